//! Domain DTOs for the Postmark template and templated-send endpoints.
//!
//! # Design
//! Field names follow Postmark's PascalCase wire format. Request payloads skip
//! unset optional fields so the server only sees what the caller supplied;
//! response types default every field the provider may omit (create and edit
//! responses, for example, only echo `TemplateId`, `Name` and `Active`).
//! The sandbox crate defines its own copies of these shapes and the
//! integration tests catch drift between the two.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::de::{self, Deserializer};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ApiError, ErrorEnvelope};

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// A stored template as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    pub template_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub associated_server_id: i64,
}

/// One entry of a template listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateSummary {
    pub template_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub active: bool,
}

/// A window of the template listing plus the size of the whole set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateListResult {
    pub total_count: u64,
    #[serde(default)]
    pub templates: Vec<TemplateSummary>,
}

impl TemplateListResult {
    pub fn ids(&self) -> Vec<i64> {
        self.templates.iter().map(|t| t.template_id).collect()
    }
}

/// Body of a successful delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteConfirmation {
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub message: String,
}

/// Request payload for creating a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct CreateTemplate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl CreateTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject: None,
            html_body: None,
            text_body: None,
            alias: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_html_body(mut self, html_body: impl Into<String>) -> Self {
        self.html_body = Some(html_body.into());
        self
    }

    pub fn with_text_body(mut self, text_body: impl Into<String>) -> Self {
        self.text_body = Some(text_body.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// Request payload for editing a template. Only the fields present in the
/// JSON are applied; omitted fields remain unchanged on the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct EditTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl EditTemplate {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_html_body(mut self, html_body: impl Into<String>) -> Self {
        self.html_body = Some(html_body.into());
        self
    }

    pub fn with_text_body(mut self, text_body: impl Into<String>) -> Self {
        self.text_body = Some(text_body.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Template content to check, plus a model used for the test render.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ValidationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_render_model: Option<Value>,
    pub inline_css_for_html_test_render: bool,
}

impl Default for ValidationRequest {
    fn default() -> Self {
        Self {
            subject: None,
            html_body: None,
            text_body: None,
            test_render_model: None,
            inline_css_for_html_test_render: true,
        }
    }
}

impl ValidationRequest {
    pub fn new(
        subject: impl Into<String>,
        html_body: impl Into<String>,
        text_body: impl Into<String>,
        test_render_model: Value,
    ) -> Self {
        Self {
            subject: Some(subject.into()),
            html_body: Some(html_body.into()),
            text_body: Some(text_body.into()),
            test_render_model: Some(test_render_model),
            ..Self::default()
        }
    }
}

/// A problem found in one template field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ContentError {
    pub message: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub character_position: Option<u32>,
}

/// Validation outcome for one of Subject, HtmlBody or TextBody.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ContentValidation {
    pub content_is_valid: bool,
    #[serde(default)]
    pub validation_errors: Vec<ContentError>,
    #[serde(default)]
    pub rendered_content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ValidationResult {
    pub all_content_is_valid: bool,
    #[serde(default)]
    pub subject: Option<ContentValidation>,
    #[serde(default)]
    pub html_body: Option<ContentValidation>,
    #[serde(default)]
    pub text_body: Option<ContentValidation>,
    #[serde(default)]
    pub suggested_template_model: Value,
}

impl ValidationResult {
    /// Logical AND of the per-field flags. Fields that were not submitted
    /// count as valid.
    pub fn per_field_valid(&self) -> bool {
        [&self.subject, &self.html_body, &self.text_body]
            .into_iter()
            .flatten()
            .all(|field| field.content_is_valid)
    }
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

/// Which template a message is rendered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TemplateTarget {
    #[serde(rename = "TemplateId")]
    Id(i64),
    #[serde(rename = "TemplateAlias")]
    Alias(String),
}

/// Placeholder values for a templated send.
///
/// Both variants serialize to the same JSON object; a raw string is parsed at
/// request-build time and must hold a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateModel {
    Structured(Map<String, Value>),
    RawJson(String),
}

impl TemplateModel {
    pub fn raw(json: impl Into<String>) -> Self {
        TemplateModel::RawJson(json.into())
    }

    /// Capture any serializable value as a structured model.
    pub fn from_serializable<T: Serialize>(model: &T) -> Result<Self, ApiError> {
        let value =
            serde_json::to_value(model).map_err(|e| ApiError::Serialization(e.to_string()))?;
        into_object(value).map(TemplateModel::Structured)
    }

    /// The JSON object this model puts on the wire.
    pub fn resolve(&self) -> Result<Map<String, Value>, ApiError> {
        match self {
            TemplateModel::Structured(map) => Ok(map.clone()),
            TemplateModel::RawJson(raw) => {
                let value: Value = serde_json::from_str(raw).map_err(|e| {
                    ApiError::Serialization(format!("template model is not valid JSON: {e}"))
                })?;
                into_object(value)
            }
        }
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>, ApiError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ApiError::Serialization(format!(
            "template model must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl Default for TemplateModel {
    fn default() -> Self {
        TemplateModel::Structured(Map::new())
    }
}

impl From<Map<String, Value>> for TemplateModel {
    fn from(map: Map<String, Value>) -> Self {
        TemplateModel::Structured(map)
    }
}

impl Serialize for TemplateModel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TemplateModel::Structured(map) => map.serialize(serializer),
            TemplateModel::RawJson(_) => self
                .resolve()
                .map_err(ser::Error::custom)?
                .serialize(serializer),
        }
    }
}

/// Link tracking mode for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkTracking {
    None,
    HtmlAndText,
    HtmlOnly,
    TextOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

/// A message rendered from a stored template.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplatedMessage {
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub template: TemplateTarget,
    pub template_model: TemplateModel,
    pub inline_css: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bcc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<MessageHeader>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_opens: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_links: Option<LinkTracking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_stream: Option<String>,
}

impl TemplatedMessage {
    /// A message with an empty model and CSS inlining on.
    pub fn new(template: TemplateTarget, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            template,
            template_model: TemplateModel::default(),
            inline_css: true,
            cc: None,
            bcc: None,
            reply_to: None,
            tag: None,
            headers: Vec::new(),
            track_opens: None,
            track_links: None,
            metadata: None,
            message_stream: None,
        }
    }

    pub fn with_model(mut self, model: TemplateModel) -> Self {
        self.template_model = model;
        self
    }

    pub fn with_inline_css(mut self, inline_css: bool) -> Self {
        self.inline_css = inline_css;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(MessageHeader {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

/// Body of a batch send.
#[derive(Debug, Serialize)]
pub(crate) struct BatchRequest<'a> {
    #[serde(rename = "Messages")]
    pub messages: &'a [TemplatedMessage],
}

/// Delivery status derived from a send result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryStatus {
    #[default]
    Unknown,
    Success,
}

/// Outcome of sending one message.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SendResult {
    #[serde(rename = "MessageID", default, deserialize_with = "nil_if_empty")]
    pub message_id: Uuid,
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub submitted_at: Option<DateTime<FixedOffset>>,
    #[serde(skip)]
    pub status: DeliveryStatus,
}

impl SendResult {
    /// Result for a message the provider rejected with `envelope`.
    pub fn rejected(envelope: ErrorEnvelope) -> Self {
        Self {
            message_id: Uuid::nil(),
            error_code: envelope.error_code,
            message: envelope.message,
            to: None,
            submitted_at: None,
            status: DeliveryStatus::Unknown,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeliveryStatus::Success
    }

    /// Derive `status` from the error code and message id.
    pub(crate) fn classified(mut self) -> Self {
        self.status = if self.error_code == 0 && !self.message_id.is_nil() {
            DeliveryStatus::Success
        } else {
            DeliveryStatus::Unknown
        };
        if self.error_code != 0 {
            self.message_id = Uuid::nil();
        }
        self
    }
}

fn nil_if_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Uuid, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(Uuid::nil()),
        Some(s) if s.trim().is_empty() => Ok(Uuid::nil()),
        Some(s) => Uuid::parse_str(&s).map_err(de::Error::custom),
    }
}

// Error entries sometimes carry an offset-less placeholder date.
fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<FixedOffset>>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_and_raw_models_serialize_identically() {
        let structured = TemplateModel::from_serializable(&json!({"name": "Andrew"})).unwrap();
        let raw = TemplateModel::raw(r#"{ "name" : "Andrew" }"#);
        assert_eq!(
            serde_json::to_value(&structured).unwrap(),
            serde_json::to_value(&raw).unwrap()
        );
    }

    #[test]
    fn raw_model_must_be_an_object() {
        let err = TemplateModel::raw("[1, 2]").resolve().unwrap_err();
        assert!(err.to_string().contains("an array"));
        let err = TemplateModel::raw("{not json").resolve().unwrap_err();
        assert!(matches!(err, ApiError::Serialization(_)));
    }

    #[test]
    fn serializable_struct_becomes_structured_model() {
        #[derive(Serialize)]
        struct Model {
            name: &'static str,
        }
        let model = TemplateModel::from_serializable(&Model { name: "Andrew" }).unwrap();
        assert_eq!(model.resolve().unwrap()["name"], "Andrew");
        assert!(TemplateModel::from_serializable(&42).is_err());
    }

    #[test]
    fn message_carries_exactly_one_template_reference() {
        let by_id = TemplatedMessage::new(TemplateTarget::Id(7), "a@example.com", "b@example.com");
        let body = serde_json::to_value(&by_id).unwrap();
        assert_eq!(body["TemplateId"], 7);
        assert!(body.get("TemplateAlias").is_none());

        let by_alias = TemplatedMessage::new(
            TemplateTarget::Alias("welcome".into()),
            "a@example.com",
            "b@example.com",
        );
        let body = serde_json::to_value(&by_alias).unwrap();
        assert_eq!(body["TemplateAlias"], "welcome");
        assert!(body.get("TemplateId").is_none());
        assert_eq!(body["InlineCss"], true);
        assert_eq!(body["TemplateModel"], json!({}));
        assert!(body.get("Cc").is_none());
        assert!(body.get("Headers").is_none());
    }

    #[test]
    fn optional_message_fields_use_wire_names() {
        let msg = TemplatedMessage::new(TemplateTarget::Id(1), "a@example.com", "b@example.com")
            .with_tag("welcome")
            .with_header("X-Campaign", "fall")
            .with_inline_css(false);
        let body = serde_json::to_value(&msg).unwrap();
        assert_eq!(body["Tag"], "welcome");
        assert_eq!(body["Headers"], json!([{"Name": "X-Campaign", "Value": "fall"}]));
        assert_eq!(body["InlineCss"], false);
    }

    #[test]
    fn send_result_without_message_id_is_nil() {
        let result: SendResult = serde_json::from_str(
            r#"{"ErrorCode":1101,"Message":"gone","MessageID":""}"#,
        )
        .unwrap();
        assert!(result.message_id.is_nil());
        let result = result.classified();
        assert_eq!(result.status, DeliveryStatus::Unknown);
        assert!(!result.is_success());
    }

    #[test]
    fn successful_send_result_is_classified() {
        let result: SendResult = serde_json::from_str::<SendResult>(
            r#"{"To":"b@example.com","SubmittedAt":"2014-02-17T07:25:01.4178645-05:00",
                "MessageID":"0a129aee-e1cd-480d-b08d-4f48548ff48d","ErrorCode":0,"Message":"OK"}"#,
        )
        .unwrap()
        .classified();
        assert!(result.is_success());
        assert!(result.submitted_at.is_some());
        assert_eq!(result.to.as_deref(), Some("b@example.com"));
    }

    #[test]
    fn placeholder_timestamp_is_dropped() {
        let result: SendResult =
            serde_json::from_str(r#"{"ErrorCode":406,"SubmittedAt":"0001-01-01T00:00:00"}"#)
                .unwrap();
        assert!(result.submitted_at.is_none());
    }

    #[test]
    fn per_field_validity_ignores_missing_fields() {
        let valid = ContentValidation {
            content_is_valid: true,
            validation_errors: Vec::new(),
            rendered_content: None,
        };
        let mut result = ValidationResult {
            all_content_is_valid: true,
            subject: Some(valid.clone()),
            html_body: None,
            text_body: Some(valid),
            suggested_template_model: Value::Null,
        };
        assert!(result.per_field_valid());
        result.text_body.as_mut().unwrap().content_is_valid = false;
        assert!(!result.per_field_valid());
    }
}

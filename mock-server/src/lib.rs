//! In-process sandbox of the Postmark template and templated-send API.
//!
//! Implements the endpoints the client uses with Postmark's wire format:
//! token authentication, template storage with soft delete, offset
//! pagination, template validation with model inference, and single and
//! batch templated sends. Every API error is a 422 (401 for auth) carrying
//! `{"ErrorCode": n, "Message": "..."}`.

pub mod engine;

use std::{collections::BTreeMap, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

/// Token accepted when none is configured.
pub const DEFAULT_SERVER_TOKEN: &str = "POSTMARK_API_TEST";

pub const SERVER_TOKEN_HEADER: &str = "x-postmark-server-token";

/// Id reported as `AssociatedServerId` for every template.
pub const SANDBOX_SERVER_ID: i64 = 1;

pub const MAX_PAGE_SIZE: usize = 500;
pub const MAX_BATCH_SIZE: usize = 500;

const FIRST_TEMPLATE_ID: i64 = 1000;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    pub template_id: i64,
    pub name: String,
    pub subject: Option<String>,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub alias: Option<String>,
    pub active: bool,
    pub associated_server_id: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateSummary {
    pub template_id: i64,
    pub name: String,
    pub alias: Option<String>,
    pub active: bool,
}

impl From<&Template> for TemplateSummary {
    fn from(t: &Template) -> Self {
        Self {
            template_id: t.template_id,
            name: t.name.clone(),
            alias: t.alias.clone(),
            active: t.active,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateList {
    pub total_count: usize,
    pub templates: Vec<TemplateSummary>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateTemplate {
    #[serde(default)]
    pub name: String,
    pub subject: Option<String>,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub alias: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EditTemplate {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub alias: Option<String>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub offset: Option<usize>,
    pub count: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ValidateTemplate {
    pub subject: Option<String>,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub test_render_model: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContentError {
    pub message: String,
    pub line: u32,
    pub character_position: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContentValidation {
    pub content_is_valid: bool,
    pub validation_errors: Vec<ContentError>,
    pub rendered_content: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ValidationResult {
    pub all_content_is_valid: bool,
    pub subject: Option<ContentValidation>,
    pub html_body: Option<ContentValidation>,
    pub text_body: Option<ContentValidation>,
    pub suggested_template_model: Value,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplatedMessage {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub template_id: Option<i64>,
    pub template_alias: Option<String>,
    pub template_model: Option<Value>,
    #[serde(default = "default_inline_css")]
    pub inline_css: bool,
    pub tag: Option<String>,
}

fn default_inline_css() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchRequest {
    #[serde(default)]
    pub messages: Vec<TemplatedMessage>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SendResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(rename = "MessageID", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    pub error_code: i64,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorBody {
    pub error_code: i64,
    pub message: String,
}

/// A message the sandbox accepted, as rendered.
#[derive(Clone, Debug, PartialEq)]
pub struct SentMessage {
    pub message_id: Uuid,
    pub template_id: i64,
    pub from: String,
    pub to: String,
    pub tag: Option<String>,
    pub inline_css: bool,
    pub model: Value,
    pub subject: String,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
}

#[derive(Default)]
struct Store {
    templates: BTreeMap<i64, Template>,
    next_id: i64,
    outbox: Vec<SentMessage>,
}

impl Store {
    fn allocate_id(&mut self) -> i64 {
        let id = FIRST_TEMPLATE_ID + self.next_id;
        self.next_id += 1;
        id
    }

    fn alias_taken(&self, alias: &str, except: Option<i64>) -> bool {
        self.templates.values().any(|t| {
            t.active && Some(t.template_id) != except && t.alias.as_deref() == Some(alias)
        })
    }
}

/// Shared sandbox state. Cloning shares the same store.
#[derive(Clone)]
pub struct Sandbox {
    store: Arc<RwLock<Store>>,
    server_token: Arc<str>,
}

impl Sandbox {
    pub fn new(server_token: &str) -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
            server_token: Arc::from(server_token),
        }
    }

    pub async fn sent_messages(&self) -> Vec<SentMessage> {
        self.store.read().await.outbox.clone()
    }

    /// Same as [`Sandbox::sent_messages`] for callers outside the runtime.
    pub fn sent_messages_blocking(&self) -> Vec<SentMessage> {
        self.store.blocking_read().outbox.clone()
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_TOKEN)
    }
}

type Rejection = (StatusCode, Json<ErrorBody>);

fn reject(code: i64, message: impl Into<String>) -> Rejection {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorBody {
            error_code: code,
            message: message.into(),
        }),
    )
}

fn invalid_json(rejection: JsonRejection) -> Rejection {
    debug!(%rejection, "rejecting request body");
    reject(402, "Received invalid JSON input.")
}

fn template_not_found() -> Rejection {
    reject(
        1101,
        "The 'TemplateId' associated with this request is not valid or was not found.",
    )
}

pub fn app() -> Router {
    router(Sandbox::default())
}

pub fn router(sandbox: Sandbox) -> Router {
    Router::new()
        .route("/templates", get(list_templates).post(create_template))
        .route("/templates/validate", post(validate_template))
        .route(
            "/templates/{id}",
            get(get_template).put(edit_template).delete(delete_template),
        )
        .route("/email/withTemplate", post(send_with_template))
        .route("/email/batchWithTemplates", post(send_batch))
        .route_layer(middleware::from_fn_with_state(sandbox.clone(), require_token))
        .layer(TraceLayer::new_for_http())
        .with_state(sandbox)
}

pub async fn serve(listener: TcpListener, sandbox: Sandbox) -> Result<(), std::io::Error> {
    axum::serve(listener, router(sandbox)).await
}

async fn require_token(State(sandbox): State<Sandbox>, request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(SERVER_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    if token != Some(&*sandbox.server_token) {
        let body = ErrorBody {
            error_code: 10,
            message: "Bad or missing Server API token.".to_string(),
        };
        return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    }
    next.run(request).await
}

/// Reject empty names, missing bodies and unparseable template content.
fn check_content(
    name: &str,
    subject: Option<&str>,
    html_body: Option<&str>,
    text_body: Option<&str>,
) -> Result<(), Rejection> {
    if name.trim().is_empty() {
        return Err(reject(1120, "The 'Name' field is required."));
    }
    if html_body.is_none() && text_body.is_none() {
        return Err(reject(
            1120,
            "Either the 'HtmlBody' or 'TextBody' field is required.",
        ));
    }
    let fields = [
        ("Subject", subject),
        ("HtmlBody", html_body),
        ("TextBody", text_body),
    ];
    for (field, content) in fields {
        if let Some(Err(e)) = content.map(engine::compile) {
            return Err(reject(
                1122,
                format!(
                    "The '{field}' field contains invalid template syntax at line {}, position {}: {}",
                    e.line, e.column, e.message
                ),
            ));
        }
    }
    Ok(())
}

async fn create_template(
    State(sandbox): State<Sandbox>,
    payload: Result<Json<CreateTemplate>, JsonRejection>,
) -> Result<Json<TemplateSummary>, Rejection> {
    let Json(input) = payload.map_err(invalid_json)?;
    check_content(
        &input.name,
        input.subject.as_deref(),
        input.html_body.as_deref(),
        input.text_body.as_deref(),
    )?;

    let mut store = sandbox.store.write().await;
    if let Some(alias) = input.alias.as_deref() {
        if store.alias_taken(alias, None) {
            return Err(reject(1122, format!("The alias '{alias}' is already in use.")));
        }
    }
    let template = Template {
        template_id: store.allocate_id(),
        name: input.name,
        subject: input.subject,
        html_body: input.html_body,
        text_body: input.text_body,
        alias: input.alias,
        active: true,
        associated_server_id: SANDBOX_SERVER_ID,
    };
    info!(template_id = template.template_id, "template created");
    let summary = TemplateSummary::from(&template);
    store.templates.insert(template.template_id, template);
    Ok(Json(summary))
}

async fn get_template(
    State(sandbox): State<Sandbox>,
    Path(id): Path<i64>,
) -> Result<Json<Template>, Rejection> {
    let store = sandbox.store.read().await;
    store
        .templates
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(template_not_found)
}

async fn edit_template(
    State(sandbox): State<Sandbox>,
    Path(id): Path<i64>,
    payload: Result<Json<EditTemplate>, JsonRejection>,
) -> Result<Json<TemplateSummary>, Rejection> {
    let Json(input) = payload.map_err(invalid_json)?;
    let mut store = sandbox.store.write().await;
    if !store.templates.contains_key(&id) {
        return Err(template_not_found());
    }
    if let Some(alias) = input.alias.as_deref() {
        if store.alias_taken(alias, Some(id)) {
            return Err(reject(1122, format!("The alias '{alias}' is already in use.")));
        }
    }
    let template = store.templates.get_mut(&id).ok_or_else(template_not_found)?;

    let mut updated = template.clone();
    if let Some(name) = input.name {
        updated.name = name;
    }
    if let Some(subject) = input.subject {
        updated.subject = Some(subject);
    }
    if let Some(html_body) = input.html_body {
        updated.html_body = Some(html_body);
    }
    if let Some(text_body) = input.text_body {
        updated.text_body = Some(text_body);
    }
    if let Some(alias) = input.alias {
        updated.alias = Some(alias);
    }
    check_content(
        &updated.name,
        updated.subject.as_deref(),
        updated.html_body.as_deref(),
        updated.text_body.as_deref(),
    )?;

    *template = updated;
    Ok(Json(TemplateSummary::from(&*template)))
}

async fn delete_template(
    State(sandbox): State<Sandbox>,
    Path(id): Path<i64>,
) -> Result<Json<ErrorBody>, Rejection> {
    let mut store = sandbox.store.write().await;
    let template = store.templates.get_mut(&id).ok_or_else(template_not_found)?;
    template.active = false;
    info!(template_id = id, "template deactivated");
    Ok(Json(ErrorBody {
        error_code: 0,
        message: format!("Template {id} removed."),
    }))
}

async fn list_templates(
    State(sandbox): State<Sandbox>,
    Query(query): Query<ListQuery>,
) -> Json<TemplateList> {
    let offset = query.offset.unwrap_or(0);
    let count = query.count.unwrap_or(100).min(MAX_PAGE_SIZE);

    let store = sandbox.store.read().await;
    let active: Vec<&Template> = store.templates.values().filter(|t| t.active).collect();
    Json(TemplateList {
        total_count: active.len(),
        templates: active
            .into_iter()
            .skip(offset)
            .take(count)
            .map(TemplateSummary::from)
            .collect(),
    })
}

fn validate_field(
    content: &str,
    model: &Value,
    html: bool,
    suggested: &mut Map<String, Value>,
) -> ContentValidation {
    let invalid = |error: ContentError| ContentValidation {
        content_is_valid: false,
        validation_errors: vec![error],
        rendered_content: None,
    };
    let template = match engine::compile(content) {
        Ok(template) => template,
        Err(e) => {
            return invalid(ContentError {
                message: e.message,
                line: e.line,
                character_position: e.column,
            })
        }
    };
    engine::merge(suggested, engine::suggest_model(&template));
    match engine::render(content, model, html) {
        Ok(rendered) => ContentValidation {
            content_is_valid: true,
            validation_errors: Vec::new(),
            rendered_content: Some(rendered),
        },
        Err(e) => invalid(ContentError {
            message: e.to_string(),
            line: 1,
            character_position: 1,
        }),
    }
}

async fn validate_template(
    payload: Result<Json<ValidateTemplate>, JsonRejection>,
) -> Result<Json<ValidationResult>, Rejection> {
    let Json(input) = payload.map_err(invalid_json)?;
    if input.subject.is_none() && input.html_body.is_none() && input.text_body.is_none() {
        return Err(reject(1109, "No template content was provided for validation."));
    }

    let model = input
        .test_render_model
        .unwrap_or_else(|| Value::Object(Map::new()));
    let mut suggested = Map::new();
    let subject = input
        .subject
        .map(|s| validate_field(&s, &model, false, &mut suggested));
    let html_body = input
        .html_body
        .map(|s| validate_field(&s, &model, true, &mut suggested));
    let text_body = input
        .text_body
        .map(|s| validate_field(&s, &model, false, &mut suggested));

    let all_content_is_valid = [&subject, &html_body, &text_body]
        .into_iter()
        .flatten()
        .all(|field| field.content_is_valid);

    Ok(Json(ValidationResult {
        all_content_is_valid,
        subject,
        html_body,
        text_body,
        suggested_template_model: Value::Object(suggested),
    }))
}

/// Resolve, render and record one message.
fn deliver(store: &mut Store, message: TemplatedMessage) -> Result<SendResponse, ErrorBody> {
    let fail = |code: i64, text: &str| ErrorBody {
        error_code: code,
        message: text.to_string(),
    };

    if message.from.trim().is_empty() {
        return Err(fail(300, "Invalid 'From' address: ''."));
    }
    if message.to.trim().is_empty() {
        return Err(fail(300, "Zero recipients specified."));
    }
    let template = match (message.template_id, message.template_alias.as_deref()) {
        (Some(_), Some(_)) => {
            return Err(fail(
                1123,
                "Only one of 'TemplateId' or 'TemplateAlias' may be specified.",
            ))
        }
        (None, None) => {
            return Err(fail(1120, "Either 'TemplateId' or 'TemplateAlias' is required."))
        }
        (Some(id), None) => store
            .templates
            .get(&id)
            .filter(|t| t.active)
            .ok_or_else(|| {
                fail(
                    1101,
                    "The Template's 'TemplateId' associated with this request is not valid or was not found.",
                )
            })?,
        (None, Some(alias)) => store
            .templates
            .values()
            .find(|t| t.active && t.alias.as_deref() == Some(alias))
            .ok_or_else(|| {
                fail(
                    1101,
                    "The Template's 'Alias' associated with this request is not valid or was not found.",
                )
            })?,
    };

    let model = match message.template_model {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(model @ Value::Object(_)) => model,
        Some(_) => return Err(fail(403, "The 'TemplateModel' must be a JSON object.")),
    };

    let render = |content: &Option<String>, html: bool| {
        content.as_deref().map(|source| {
            engine::render(source, &model, html).unwrap_or_default()
        })
    };
    let sent = SentMessage {
        message_id: Uuid::new_v4(),
        template_id: template.template_id,
        from: message.from,
        to: message.to.clone(),
        tag: message.tag,
        inline_css: message.inline_css,
        subject: render(&template.subject, false).unwrap_or_default(),
        html_body: render(&template.html_body, true),
        text_body: render(&template.text_body, false),
        model: model.clone(),
    };
    let response = SendResponse {
        to: Some(message.to),
        submitted_at: Some(Utc::now()),
        message_id: Some(sent.message_id),
        error_code: 0,
        message: "OK".to_string(),
    };
    info!(message_id = %sent.message_id, template_id = sent.template_id, "message accepted");
    store.outbox.push(sent);
    Ok(response)
}

async fn send_with_template(
    State(sandbox): State<Sandbox>,
    payload: Result<Json<TemplatedMessage>, JsonRejection>,
) -> Result<Json<SendResponse>, Rejection> {
    let Json(message) = payload.map_err(invalid_json)?;
    let mut store = sandbox.store.write().await;
    deliver(&mut store, message)
        .map(Json)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, Json(e)))
}

async fn send_batch(
    State(sandbox): State<Sandbox>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<Vec<SendResponse>>, Rejection> {
    let Json(batch) = payload.map_err(invalid_json)?;
    if batch.messages.len() > MAX_BATCH_SIZE {
        return Err(reject(
            300,
            format!("A batch may contain at most {MAX_BATCH_SIZE} messages."),
        ));
    }

    let mut store = sandbox.store.write().await;
    let results = batch
        .messages
        .into_iter()
        .map(|message| {
            let to = message.to.clone();
            deliver(&mut store, message).unwrap_or_else(|e| SendResponse {
                to: Some(to),
                submitted_at: None,
                message_id: None,
                error_code: e.error_code,
                message: e.message,
            })
        })
        .collect();
    Ok(Json(results))
}

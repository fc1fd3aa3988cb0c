//! Stateless HTTP request builder and response parser for the Postmark
//! template API.
//!
//! # Design
//! `TemplateClient` holds only the base URL and the server token and carries
//! no mutable state between calls. Each operation is split into a `build_*`
//! method that produces an `HttpRequest` and a `parse_*` method that consumes
//! an `HttpResponse`. Whoever executes the round-trip in between (normally
//! `PostmarkClient` with a `Transport`) stays out of the codec.
//!
//! Sends are parsed differently from everything else: a provider rejection
//! of a single message (HTTP 422 with an error envelope) is a normal
//! `SendResult`, not an `Err`.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ClientConfig;
use crate::error::{ApiError, ErrorEnvelope};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::types::{
    BatchRequest, CreateTemplate, DeleteConfirmation, EditTemplate, SendResult, Template,
    TemplateListResult, TemplatedMessage, ValidationRequest, ValidationResult,
};

/// Header carrying the server API token.
pub const SERVER_TOKEN_HEADER: &str = "x-postmark-server-token";

/// Status Postmark uses for every envelope-carrying rejection.
const UNPROCESSABLE: u16 = 422;

/// Synchronous, stateless client for the Postmark template API.
#[derive(Clone)]
pub struct TemplateClient {
    base_url: String,
    server_token: String,
}

impl TemplateClient {
    pub fn new(base_url: &str, server_token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            server_token: server_token.to_string(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(&config.base_url, &config.server_token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: HttpMethod, path: &str, body: Option<String>) -> HttpRequest {
        let mut headers = vec![
            ("accept".to_string(), "application/json".to_string()),
            (SERVER_TOKEN_HEADER.to_string(), self.server_token.clone()),
        ];
        if body.is_some() {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        HttpRequest {
            method,
            path: format!("{}{path}", self.base_url),
            headers,
            body,
        }
    }

    fn json_request<B: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        path: &str,
        input: &B,
    ) -> Result<HttpRequest, ApiError> {
        let body =
            serde_json::to_string(input).map_err(|e| ApiError::Serialization(e.to_string()))?;
        Ok(self.request(method, path, Some(body)))
    }

    pub fn build_create_template(&self, input: &CreateTemplate) -> Result<HttpRequest, ApiError> {
        self.json_request(HttpMethod::Post, "/templates", input)
    }

    pub fn build_get_template(&self, template_id: i64) -> HttpRequest {
        self.request(HttpMethod::Get, &format!("/templates/{template_id}"), None)
    }

    pub fn build_edit_template(
        &self,
        template_id: i64,
        input: &EditTemplate,
    ) -> Result<HttpRequest, ApiError> {
        self.json_request(HttpMethod::Put, &format!("/templates/{template_id}"), input)
    }

    pub fn build_delete_template(&self, template_id: i64) -> HttpRequest {
        self.request(HttpMethod::Delete, &format!("/templates/{template_id}"), None)
    }

    pub fn build_list_templates(&self, offset: u32, count: u32) -> HttpRequest {
        self.request(
            HttpMethod::Get,
            &format!("/templates?offset={offset}&count={count}"),
            None,
        )
    }

    pub fn build_validate_template(
        &self,
        input: &ValidationRequest,
    ) -> Result<HttpRequest, ApiError> {
        self.json_request(HttpMethod::Post, "/templates/validate", input)
    }

    pub fn build_send_email_with_template(
        &self,
        message: &TemplatedMessage,
    ) -> Result<HttpRequest, ApiError> {
        self.json_request(HttpMethod::Post, "/email/withTemplate", message)
    }

    pub fn build_send_messages(
        &self,
        messages: &[TemplatedMessage],
    ) -> Result<HttpRequest, ApiError> {
        self.json_request(
            HttpMethod::Post,
            "/email/batchWithTemplates",
            &BatchRequest { messages },
        )
    }

    pub fn parse_create_template(&self, response: HttpResponse) -> Result<Template, ApiError> {
        check_status(&response, 200)?;
        decode(&response.body)
    }

    pub fn parse_get_template(&self, response: HttpResponse) -> Result<Template, ApiError> {
        check_status(&response, 200)?;
        decode(&response.body)
    }

    pub fn parse_edit_template(&self, response: HttpResponse) -> Result<Template, ApiError> {
        check_status(&response, 200)?;
        decode(&response.body)
    }

    pub fn parse_delete_template(
        &self,
        response: HttpResponse,
    ) -> Result<DeleteConfirmation, ApiError> {
        check_status(&response, 200)?;
        decode(&response.body)
    }

    pub fn parse_list_templates(
        &self,
        response: HttpResponse,
    ) -> Result<TemplateListResult, ApiError> {
        check_status(&response, 200)?;
        decode(&response.body)
    }

    pub fn parse_validate_template(
        &self,
        response: HttpResponse,
    ) -> Result<ValidationResult, ApiError> {
        check_status(&response, 200)?;
        decode(&response.body)
    }

    /// A 422 envelope becomes a rejected `SendResult`; other failures raise.
    pub fn parse_send_email_with_template(
        &self,
        response: HttpResponse,
    ) -> Result<SendResult, ApiError> {
        if response.status == UNPROCESSABLE {
            if let Some(envelope) = ErrorEnvelope::parse(&response.body) {
                return Ok(SendResult::rejected(envelope));
            }
        }
        check_status(&response, 200)?;
        decode::<SendResult>(&response.body).map(SendResult::classified)
    }

    /// Per-message rejections stay in their slot; `expected` is the number of
    /// messages sent and must match the number of results.
    pub fn parse_send_messages(
        &self,
        response: HttpResponse,
        expected: usize,
    ) -> Result<Vec<SendResult>, ApiError> {
        check_status(&response, 200)?;
        let results: Vec<SendResult> = decode(&response.body)?;
        if results.len() != expected {
            return Err(ApiError::Deserialization(format!(
                "batch returned {} results for {expected} messages",
                results.len()
            )));
        }
        Ok(results.into_iter().map(SendResult::classified).collect())
    }
}

impl fmt::Debug for TemplateClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Map non-success status codes to the appropriate `ApiError` variant.
fn check_status(response: &HttpResponse, expected: u16) -> Result<(), ApiError> {
    if response.status == expected {
        return Ok(());
    }
    if let Some(envelope) = ErrorEnvelope::parse(&response.body) {
        return Err(ApiError::from_envelope(response.status, envelope));
    }
    if response.status == 404 {
        return Err(ApiError::NotFound {
            code: None,
            message: response.body.clone(),
        });
    }
    Err(ApiError::HttpError {
        status: response.status,
        body: response.body.clone(),
    })
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::Deserialization(e.to_string()))
}

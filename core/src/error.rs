//! Error types for the Postmark template client.
//!
//! # Design
//! Postmark reports failures as an HTTP 422 carrying a JSON envelope
//! `{"ErrorCode": n, "Message": "..."}`. The provider code decides the
//! variant: template-not-found codes map to `NotFound`, request-shape codes
//! to `ValidationFailure`, everything else to `ProviderRejection`. Responses
//! without a decodable envelope keep their raw status and body in
//! `HttpError`.

use serde::Deserialize;
use thiserror::Error;

/// Provider code for "template not found" (unknown id or alias).
pub const TEMPLATE_NOT_FOUND: i64 = 1101;

/// Provider codes reporting a malformed or incomplete request.
const VALIDATION_CODES: &[i64] = &[300, 402, 403, 1109, 1120, 1121, 1122, 1123];

/// Errors returned by `TemplateClient` parse methods and the facade.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The template does not resolve for this server.
    #[error("not found: {message}")]
    NotFound { code: Option<i64>, message: String },

    /// The provider rejected the request body as malformed or incomplete.
    #[error("validation failure (code {code}): {message}")]
    ValidationFailure { code: i64, message: String },

    /// The provider answered with an error envelope not covered above.
    #[error("provider rejected request with HTTP {status} (code {code}): {message}")]
    ProviderRejection {
        status: u16,
        code: i64,
        message: String,
    },

    /// Non-success status without a recognizable error envelope.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The request never produced a response (network error, timeout).
    #[error("transport failed: {0}")]
    Transport(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("deserialization failed: {0}")]
    Deserialization(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ApiError {
    /// The provider `ErrorCode`, when the error came from an envelope.
    pub fn provider_code(&self) -> Option<i64> {
        match self {
            ApiError::NotFound { code, .. } => *code,
            ApiError::ValidationFailure { code, .. }
            | ApiError::ProviderRejection { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Classify an error envelope returned with `status`.
    pub(crate) fn from_envelope(status: u16, envelope: ErrorEnvelope) -> Self {
        let ErrorEnvelope { error_code: code, message } = envelope;
        if code == TEMPLATE_NOT_FOUND {
            ApiError::NotFound {
                code: Some(code),
                message,
            }
        } else if VALIDATION_CODES.contains(&code) {
            ApiError::ValidationFailure { code, message }
        } else {
            ApiError::ProviderRejection {
                status,
                code,
                message,
            }
        }
    }
}

/// Error body returned by the provider.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorEnvelope {
    pub error_code: i64,
    #[serde(default)]
    pub message: String,
}

impl ErrorEnvelope {
    /// Decode an envelope from a response body, if it is one.
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }
}

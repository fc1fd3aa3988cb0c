//! Client for Postmark's template API and templated sends.
//!
//! # Overview
//! `TemplateClient` builds `HttpRequest` values and parses `HttpResponse`
//! values without touching the network. `PostmarkClient` pairs it with a
//! `Transport` (by default `UreqTransport`) and exposes one blocking method
//! per remote operation: create, get, edit, delete, list and validate
//! templates, send a templated email, and send a batch.
//!
//! # Design
//! - Clients are stateless: base URL, server token and page size only.
//! - Single-item operations return `Err(ApiError)` on any failure. Sends
//!   report provider rejections inside `SendResult` instead, so one bad
//!   message in a batch never hides the others.
//! - DTOs are defined independently from the sandbox crate; integration
//!   tests catch schema drift.
//!
//! ```no_run
//! use postmark_core::{ClientConfig, CreateTemplate, PostmarkClient};
//!
//! let config = ClientConfig::load()?;
//! let client = PostmarkClient::new(&config)?;
//! let template = client.create_template(
//!     &CreateTemplate::new("welcome")
//!         .with_subject("Hello {{name}}")
//!         .with_text_body("Hello, {{name}}!"),
//! )?;
//! println!("created template {}", template.template_id);
//! # Ok::<(), postmark_core::ApiError>(())
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod facade;
pub mod http;
pub mod transport;
pub mod types;

pub use client::TemplateClient;
pub use config::ClientConfig;
pub use error::{ApiError, ErrorEnvelope};
pub use facade::PostmarkClient;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use transport::{Transport, UreqTransport};
pub use types::{
    ContentError, ContentValidation, CreateTemplate, DeleteConfirmation, DeliveryStatus,
    EditTemplate, LinkTracking, MessageHeader, SendResult, Template, TemplateListResult,
    TemplateModel, TemplateSummary, TemplateTarget, TemplatedMessage, ValidationRequest,
    ValidationResult,
};

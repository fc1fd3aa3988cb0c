//! One method per remote operation: build, execute, parse.
//!
//! `PostmarkClient` holds immutable configuration and a transport, so a
//! shared reference can be used from several threads at once when the
//! transport allows it.

use tracing::{debug, info, warn};

use crate::client::TemplateClient;
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::{Transport, UreqTransport};
use crate::types::{
    CreateTemplate, DeleteConfirmation, EditTemplate, SendResult, Template, TemplateListResult,
    TemplatedMessage, ValidationRequest, ValidationResult,
};

/// Template management and templated sending against the Postmark API.
#[derive(Debug, Clone)]
pub struct PostmarkClient<T = UreqTransport> {
    codec: TemplateClient,
    transport: T,
    page_size: u32,
}

impl PostmarkClient<UreqTransport> {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        config.validate()?;
        Ok(Self::with_transport(
            config,
            UreqTransport::new(config.timeout()),
        ))
    }
}

impl<T: Transport> PostmarkClient<T> {
    pub fn with_transport(config: &ClientConfig, transport: T) -> Self {
        Self {
            codec: TemplateClient::from_config(config),
            transport,
            page_size: config.page_size,
        }
    }

    pub fn codec(&self) -> &TemplateClient {
        &self.codec
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let method = request.method;
        let path = request.path.clone();
        debug!(%method, %path, "sending request");

        match self.transport.execute(request) {
            Ok(response) => {
                debug!(%method, %path, status = response.status, "received response");
                Ok(response)
            }
            Err(e) => {
                warn!(%method, %path, error = %e, "request failed in transport");
                Err(e)
            }
        }
    }

    pub fn create_template(&self, input: &CreateTemplate) -> Result<Template, ApiError> {
        let request = self.codec.build_create_template(input)?;
        let template = self.codec.parse_create_template(self.round_trip(request)?)?;
        info!(template_id = template.template_id, name = %template.name, "template created");
        Ok(template)
    }

    pub fn get_template(&self, template_id: i64) -> Result<Template, ApiError> {
        let request = self.codec.build_get_template(template_id);
        self.codec.parse_get_template(self.round_trip(request)?)
    }

    pub fn edit_template(
        &self,
        template_id: i64,
        input: &EditTemplate,
    ) -> Result<Template, ApiError> {
        let request = self.codec.build_edit_template(template_id, input)?;
        self.codec.parse_edit_template(self.round_trip(request)?)
    }

    /// Deactivate a template. The record stays readable with `Active=false`.
    pub fn delete_template(&self, template_id: i64) -> Result<DeleteConfirmation, ApiError> {
        let request = self.codec.build_delete_template(template_id);
        let confirmation = self.codec.parse_delete_template(self.round_trip(request)?)?;
        info!(template_id, "template deleted");
        Ok(confirmation)
    }

    /// List active templates starting at `offset`, one configured page long.
    pub fn list_templates(&self, offset: u32) -> Result<TemplateListResult, ApiError> {
        self.list_templates_page(offset, self.page_size)
    }

    pub fn list_templates_page(
        &self,
        offset: u32,
        count: u32,
    ) -> Result<TemplateListResult, ApiError> {
        let request = self.codec.build_list_templates(offset, count);
        self.codec.parse_list_templates(self.round_trip(request)?)
    }

    pub fn validate_template(
        &self,
        input: &ValidationRequest,
    ) -> Result<ValidationResult, ApiError> {
        let request = self.codec.build_validate_template(input)?;
        self.codec.parse_validate_template(self.round_trip(request)?)
    }

    /// Send one message. A provider rejection is returned as a `SendResult`
    /// with a nonzero `error_code`; only call-level failures are `Err`.
    pub fn send_email_with_template(
        &self,
        message: &TemplatedMessage,
    ) -> Result<SendResult, ApiError> {
        let request = self.codec.build_send_email_with_template(message)?;
        let result = self
            .codec
            .parse_send_email_with_template(self.round_trip(request)?)?;
        if result.is_success() {
            info!(message_id = %result.message_id, "templated message accepted");
        } else {
            warn!(
                error_code = result.error_code,
                message = %result.message,
                "templated message rejected"
            );
        }
        Ok(result)
    }

    /// Send a batch. Results line up with `messages` by position and a
    /// rejected message never fails the call.
    pub fn send_messages(
        &self,
        messages: &[TemplatedMessage],
    ) -> Result<Vec<SendResult>, ApiError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let request = self.codec.build_send_messages(messages)?;
        let results = self
            .codec
            .parse_send_messages(self.round_trip(request)?, messages.len())?;

        let rejected = results.iter().filter(|r| !r.is_success()).count();
        for (index, result) in results.iter().enumerate().filter(|(_, r)| !r.is_success()) {
            warn!(
                index,
                error_code = result.error_code,
                message = %result.message,
                "batch message rejected"
            );
        }
        info!(sent = results.len() - rejected, rejected, "batch processed");
        Ok(results)
    }
}

//! Client settings loaded from `POSTMARK_*` environment variables.
//!
//! `ClientConfig::load` reads a `.env` file when one exists, then the
//! process environment. `from_vars` and `PostmarkClient::new` both run
//! `validate`, which bounds the page size and the request timeout.

use std::fmt;
use std::time::Duration;

use dotenvy::dotenv;
use serde::Deserialize;

use crate::error::ApiError;

/// Prefix of every environment variable read by [`ClientConfig::load`].
pub const ENV_PREFIX: &str = "POSTMARK_";

pub const DEFAULT_BASE_URL: &str = "https://api.postmarkapp.com";

/// Largest page the listing endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 500;

/// Immutable client settings.
#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    pub server_token: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    100
}

impl ClientConfig {
    pub fn new(server_token: impl Into<String>) -> Self {
        Self {
            server_token: server_token.into(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Read `POSTMARK_*` variables, loading a `.env` file first if present.
    pub fn load() -> Result<Self, ApiError> {
        dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ApiError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .map_err(|e| ApiError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.server_token.trim().is_empty() {
            return Err(ApiError::Config("server token is empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(ApiError::Config("timeout must be at least one second".to_string()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(ApiError::Config(format!(
                "page size {} is outside 1..={MAX_PAGE_SIZE}",
                self.page_size
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// The token stays out of logs.
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("server_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("page_size", &self.page_size)
            .finish()
    }
}

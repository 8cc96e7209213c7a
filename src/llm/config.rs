//! Completion endpoint configuration

use std::time::Duration;

/// Upper bound on generated tokens per reply
pub const MAX_TOKENS: u32 = 1000;

/// Sampling temperature sent with every request
pub const TEMPERATURE: f32 = 0.7;

pub const DEFAULT_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
pub const DEFAULT_MODEL: &str = "doubao-pro-4k";

/// Configuration for the completion endpoint
#[derive(Clone, Debug)]
pub struct CompletionConfig {
    /// Base URL; `/chat/completions` is appended
    pub base_url: String,

    /// Sent as a bearer token
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// Bound on the whole request, including reading the body
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl CompletionConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.trim().is_empty() {
            return Err("Completion base URL is required".to_string());
        }
        if self.model.trim().is_empty() {
            return Err("Completion model is required".to_string());
        }
        if self.timeout.is_zero() {
            return Err("Completion timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

//! HTTP client for an OpenAI-compatible `/chat/completions` endpoint

use super::config::{CompletionConfig, MAX_TOKENS, TEMPERATURE};
use super::context::{ChatMessage, ContextWindow};
use super::prompts::{EMPTY_REPLY, FALLBACK_REPLY, SYSTEM_PROMPT};
use crate::messages::Message;
use crate::{MurmurError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Produces the assistant's reply to a new user turn.
///
/// Implementations never fail: whatever goes wrong, some reply comes back.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// # Arguments
    /// * `user_text` - The new user turn
    /// * `history` - Conversation before `user_text`, oldest first
    async fn complete(&self, user_text: &str, history: &[Message]) -> String;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct CompletionClient {
    client: reqwest::Client,
    config: CompletionConfig,
}

impl CompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self> {
        config.validate().map_err(MurmurError::ConfigError)?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MurmurError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Send one request for `window`.
    ///
    /// Returns `Ok(None)` when the service answered without reply text.
    pub async fn request(&self, window: &ContextWindow) -> Result<Option<String>> {
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages: window.messages(),
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(self.config.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| MurmurError::CompletionUnavailable(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MurmurError::CompletionUnavailable(format!(
                "API error {}: {}",
                status, body
            )));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            MurmurError::CompletionUnavailable(format!("Malformed response: {}", e))
        })?;

        debug!(
            "Completion answered in {}ms with {} choices",
            started.elapsed().as_millis(),
            parsed.choices.len()
        );

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.is_empty()))
    }
}

#[async_trait]
impl CompletionService for CompletionClient {
    async fn complete(&self, user_text: &str, history: &[Message]) -> String {
        let window = ContextWindow::build(SYSTEM_PROMPT, history, user_text);
        info!("Requesting completion with {} turns", window.len());

        match self.request(&window).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                warn!("Completion response had no content");
                EMPTY_REPLY.to_string()
            }
            Err(e) => {
                warn!("Completion failed, using fallback reply: {}", e);
                FALLBACK_REPLY.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let window = ContextWindow::build("sys", &[], "Hello");
        let body = ChatCompletionRequest {
            model: "m",
            messages: window.messages(),
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "m");
        assert_eq!(json["max_tokens"], 1000);
        assert!((json["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(json["messages"][1]["role"], "user");
    }

    #[test]
    fn test_response_without_message_parses() {
        let parsed: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"index":0}],"usage":{"total_tokens":3}}"#).unwrap();
        assert!(parsed.choices[0].message.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_falls_back() {
        let config = CompletionConfig::new("http://127.0.0.1:9", "key")
            .with_timeout(std::time::Duration::from_secs(2));
        let client = CompletionClient::new(config).unwrap();

        assert_eq!(client.complete("hi", &[]).await, FALLBACK_REPLY);
    }
}

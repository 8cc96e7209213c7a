//! Remote speech-to-text over an OpenAI-style transcription endpoint

use crate::{MurmurError, RecognitionError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Turns a finished WAV recording into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// # Arguments
    /// * `wav` - Complete WAV file bytes
    /// * `locale` - BCP-47 locale the speech is expected in, e.g. `zh-CN`
    async fn transcribe(&self, wav: Vec<u8>, locale: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "whisper-1".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

fn unavailable(detail: impl Into<String>) -> MurmurError {
    MurmurError::RecognitionFailed(RecognitionError::RecognizerUnavailable(detail.into()))
}

/// Language hint sent with the upload: the primary subtag of the locale
pub fn language_code(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or(locale)
        .to_ascii_lowercase()
}

pub struct HttpTranscriber {
    client: reqwest::Client,
    config: TranscriptionConfig,
}

impl HttpTranscriber {
    pub fn new(config: TranscriptionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MurmurError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/audio/transcriptions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, wav: Vec<u8>, locale: &str) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting transcription");

        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| unavailable(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.config.model.clone())
            .text("language", language_code(locale));

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                unavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(unavailable(format!("transcription API error {}: {}", status, body)));
        }

        let result: TranscriptionResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse transcription response");
            unavailable(e.to_string())
        })?;

        tracing::debug!(chars = result.text.len(), "transcription finished");
        Ok(result.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_code() {
        assert_eq!(language_code("zh-CN"), "zh");
        assert_eq!(language_code("en_US"), "en");
        assert_eq!(language_code("fr"), "fr");
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let transcriber = HttpTranscriber::new(TranscriptionConfig {
            base_url: "http://localhost:9000/v1/".into(),
            ..TranscriptionConfig::default()
        })
        .unwrap();
        assert_eq!(
            transcriber.endpoint(),
            "http://localhost:9000/v1/audio/transcriptions"
        );
    }
}

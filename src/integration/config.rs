//! Configuration for the integration layer
//!
//! Loaded from a TOML file, then overridden from the environment. Every
//! field has a default, so an empty or missing file is a valid config.

use crate::llm::config::{CompletionConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::speech::{RecognitionStrategy, TranscriptionConfig, VadConfig, VoiceSettings};
use crate::{MurmurError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CompletionSection {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for CompletionSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RecognitionSection {
    pub strategy: RecognitionStrategy,
    pub locale: String,
    /// Transcription endpoint; the completion base URL when empty
    pub base_url: String,
    /// The completion API key when empty
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub energy_threshold: f32,
    pub silence_ms: u64,
    pub min_speech_ms: u64,
    pub max_utterance_secs: u64,
}

impl Default for RecognitionSection {
    fn default() -> Self {
        Self {
            strategy: RecognitionStrategy::Streaming,
            locale: "zh-CN".to_string(),
            base_url: String::new(),
            api_key: String::new(),
            model: "whisper-1".to_string(),
            timeout_secs: 30,
            energy_threshold: 0.01,
            silence_ms: 800,
            min_speech_ms: 300,
            max_utterance_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SynthesisSection {
    pub enabled: bool,
    pub program: String,
    pub locale: String,
    pub pitch: f32,
    pub rate: f32,
}

impl Default for SynthesisSection {
    fn default() -> Self {
        let voice = VoiceSettings::default();
        Self {
            enabled: true,
            program: "espeak-ng".to_string(),
            locale: voice.locale,
            pitch: voice.pitch,
            rate: voice.rate,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Directory holding the conversation log
    pub data_dir: PathBuf,
    /// Scratch directory for in-progress recordings
    pub recordings_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        let data_root = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            data_dir: data_root.join("murmur"),
            recordings_dir: std::env::temp_dir().join("murmur-recordings"),
        }
    }
}

/// Configuration for the complete application
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub completion: CompletionSection,
    pub recognition: RecognitionSection,
    pub synthesis: SynthesisSection,
    pub storage: StorageSection,
}

impl AppConfig {
    /// Default config file location, `<config dir>/murmur/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("murmur").join("config.toml"))
    }

    /// Load from `path`, or from the default location when it exists,
    /// then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate().map_err(MurmurError::ConfigError)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            MurmurError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&text)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| MurmurError::ConfigError(format!("Invalid config: {}", e)))
    }

    /// Override secrets and endpoints from environment variables
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("MURMUR_API_KEY") {
            self.completion.api_key = key;
        }
        if let Some(url) = non_empty("MURMUR_BASE_URL") {
            self.completion.base_url = url;
        }
        if let Some(model) = non_empty("MURMUR_MODEL") {
            self.completion.model = model;
        }
        if let Some(key) = non_empty("MURMUR_STT_API_KEY") {
            self.recognition.api_key = key;
        }
    }

    pub fn completion_config(&self) -> CompletionConfig {
        CompletionConfig::new(&self.completion.base_url, &self.completion.api_key)
            .with_model(&self.completion.model)
            .with_timeout(Duration::from_secs(self.completion.timeout_secs))
    }

    pub fn transcription_config(&self) -> TranscriptionConfig {
        let fallback = |own: &str, shared: &str| {
            if own.trim().is_empty() {
                shared.to_string()
            } else {
                own.to_string()
            }
        };

        TranscriptionConfig {
            base_url: fallback(&self.recognition.base_url, &self.completion.base_url),
            api_key: fallback(&self.recognition.api_key, &self.completion.api_key),
            model: self.recognition.model.clone(),
            timeout: Duration::from_secs(self.recognition.timeout_secs),
        }
    }

    pub fn vad_config(&self) -> VadConfig {
        VadConfig {
            sample_rate: crate::audio::CAPTURE_FORMAT.sample_rate,
            energy_threshold: self.recognition.energy_threshold,
            silence: Duration::from_millis(self.recognition.silence_ms),
            min_speech: Duration::from_millis(self.recognition.min_speech_ms),
            max_utterance: Duration::from_secs(self.recognition.max_utterance_secs),
        }
    }

    pub fn voice_settings(&self) -> VoiceSettings {
        VoiceSettings {
            locale: self.synthesis.locale.clone(),
            pitch: self.synthesis.pitch,
            rate: self.synthesis.rate,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.completion_config().validate()?;

        if self.recognition.locale.trim().is_empty() {
            return Err("Recognition locale is required".to_string());
        }
        if self.recognition.timeout_secs == 0 {
            return Err("Transcription timeout must be greater than zero".to_string());
        }
        if self.recognition.energy_threshold <= 0.0 {
            return Err("VAD energy threshold must be positive".to_string());
        }
        if self.recognition.silence_ms == 0 || self.recognition.max_utterance_secs == 0 {
            return Err("VAD silence and maximum utterance length must be positive".to_string());
        }

        let in_range = |v: f32| v > 0.0 && v <= 2.0;
        if !in_range(self.synthesis.pitch) || !in_range(self.synthesis.rate) {
            return Err(format!(
                "Voice pitch and rate must be within (0, 2], got {} and {}",
                self.synthesis.pitch, self.synthesis.rate
            ));
        }
        if self.synthesis.enabled && self.synthesis.program.trim().is_empty() {
            return Err("Speech program is required when synthesis is enabled".to_string());
        }

        Ok(())
    }
}

//! Spoken playback of assistant replies
//!
//! Playback is delegated to an external speech engine process (espeak-ng by
//! default) so the reply is heard on the default output device.

use crate::{MurmurError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tracing::{debug, info};

/// Voice used for every reply
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSettings {
    pub locale: String,
    /// 1.0 is the engine's normal pitch
    pub pitch: f32,
    /// 1.0 is the engine's normal speaking rate
    pub rate: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            locale: "zh-CN".to_string(),
            pitch: 1.0,
            rate: 0.8,
        }
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak `text`, returning once playback has finished
    async fn speak(&self, text: &str) -> Result<()>;
}

pub struct CommandSynthesizer {
    program: String,
    voice: VoiceSettings,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>, voice: VoiceSettings) -> Self {
        Self {
            program: program.into(),
            voice,
        }
    }

    pub fn espeak(voice: VoiceSettings) -> Self {
        Self::new("espeak-ng", voice)
    }

    /// Command-line arguments for the configured voice, text excluded
    pub fn voice_args(&self) -> Vec<String> {
        let voice = espeak_voice(&self.voice.locale);
        // espeak pitch runs 0-99 with 50 as normal, speed is words per minute
        let pitch = (self.voice.pitch * 50.0).round().clamp(0.0, 99.0) as u32;
        let speed = (self.voice.rate * 175.0).round().clamp(80.0, 450.0) as u32;

        vec![
            "-v".to_string(),
            voice,
            "-p".to_string(),
            pitch.to_string(),
            "-s".to_string(),
            speed.to_string(),
        ]
    }
}

fn espeak_voice(locale: &str) -> String {
    let lower = locale.to_ascii_lowercase().replace('_', "-");
    if lower == "zh" || lower.starts_with("zh-") {
        // Mandarin is "cmn" in espeak-ng
        return "cmn".to_string();
    }
    lower
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn speak(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }

        debug!("Speaking {} chars with {}", text.chars().count(), self.program);
        let output = tokio::process::Command::new(&self.program)
            .args(self.voice_args())
            .arg("--")
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                MurmurError::SynthesisFailed(format!("Failed to run {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MurmurError::SynthesisFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Prints nothing, plays nothing. Used when speech output is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentSynthesizer;

#[async_trait]
impl SpeechSynthesizer for SilentSynthesizer {
    async fn speak(&self, text: &str) -> Result<()> {
        info!("Speech output disabled, skipping {} chars", text.chars().count());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_voice_args() {
        let synth = CommandSynthesizer::espeak(VoiceSettings::default());
        assert_eq!(synth.voice_args(), vec!["-v", "cmn", "-p", "50", "-s", "140"]);
    }

    #[test]
    fn test_voice_mapping() {
        assert_eq!(espeak_voice("zh-CN"), "cmn");
        assert_eq!(espeak_voice("zh"), "cmn");
        assert_eq!(espeak_voice("en_US"), "en-us");
    }

    #[test]
    fn test_extreme_settings_are_clamped() {
        let synth = CommandSynthesizer::espeak(VoiceSettings {
            locale: "en".into(),
            pitch: 5.0,
            rate: 0.1,
        });
        assert_eq!(synth.voice_args(), vec!["-v", "en", "-p", "99", "-s", "80"]);
    }

    #[tokio::test]
    async fn test_missing_program_fails() {
        let synth = CommandSynthesizer::new("murmur-no-such-tts-binary", VoiceSettings::default());
        let err = synth.speak("hello").await.unwrap_err();
        assert!(matches!(err, MurmurError::SynthesisFailed(_)));
    }
}

pub mod audio;
pub mod integration;
pub mod llm;
pub mod messages;
pub mod speech;
pub mod state;

use thiserror::Error;

/// Reasons a recognition session ends without usable text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    #[error("microphone permission not granted to the recognizer")]
    NoPermission,

    #[error("no speech detected")]
    NoSpeechDetected,

    #[error("recognizer unavailable: {0}")]
    RecognizerUnavailable(String),
}

#[derive(Error, Debug, Clone)]
pub enum MurmurError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Recognition failed: {0}")]
    RecognitionFailed(RecognitionError),

    #[error("Completion unavailable: {0}")]
    CompletionUnavailable(String),

    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Orchestrator has been disposed")]
    Disposed,
}

impl From<std::io::Error> for MurmurError {
    fn from(e: std::io::Error) -> Self {
        MurmurError::IOError(e.to_string())
    }
}

impl From<RecognitionError> for MurmurError {
    fn from(e: RecognitionError) -> Self {
        MurmurError::RecognitionFailed(e)
    }
}

impl MurmurError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // The user has to grant access before anything changes
            MurmurError::PermissionDenied(_) => false,
            MurmurError::RecognitionFailed(RecognitionError::NoPermission) => false,
            MurmurError::RecognitionFailed(_) => true,
            MurmurError::CompletionUnavailable(_) => true,
            MurmurError::SynthesisFailed(_) => true,
            MurmurError::StorageFailure(_) => true,
            MurmurError::AudioDeviceError(_) => false,
            MurmurError::IOError(_) => false,
            MurmurError::ConfigError(_) => false,
            MurmurError::ChannelError(_) => false,
            MurmurError::Disposed => false,
        }
    }

    /// Errors that are reported but never interrupt the conversation
    pub fn is_best_effort(&self) -> bool {
        matches!(
            self,
            MurmurError::SynthesisFailed(_) | MurmurError::StorageFailure(_)
        )
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            MurmurError::PermissionDenied(_) => {
                "Microphone access was denied. Please allow microphone access and try again."
                    .to_string()
            }
            MurmurError::RecognitionFailed(RecognitionError::NoSpeechDetected) => {
                "No speech was detected. Please try again.".to_string()
            }
            MurmurError::RecognitionFailed(_) => {
                "Speech recognition failed. Please try again.".to_string()
            }
            MurmurError::CompletionUnavailable(_) => {
                "The assistant is unreachable right now.".to_string()
            }
            MurmurError::SynthesisFailed(_) => {
                "Could not speak the reply. It is shown as text.".to_string()
            }
            MurmurError::StorageFailure(_) => {
                "Conversation history could not be saved.".to_string()
            }
            MurmurError::AudioDeviceError(_) => {
                "Audio device error. Please check your microphone.".to_string()
            }
            MurmurError::IOError(_) => "File system error occurred.".to_string(),
            MurmurError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            MurmurError::ChannelError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            MurmurError::Disposed => "The conversation has been closed.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MurmurError>;

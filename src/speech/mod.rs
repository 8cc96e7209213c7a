//! Speech input and output
//!
//! This module provides:
//! - Speech recognition with a streaming or a batch strategy
//! - Remote transcription of recorded utterances
//! - Spoken playback of replies

pub mod batch;
pub mod recognizer;
pub mod streaming;
pub mod synthesizer;
pub mod transcriber;
pub mod vad;

pub use batch::BatchRecognizer;
pub use recognizer::{
    EventSink, RecognitionStrategy, RecognizerEvent, RecognizerEventKind, SessionId,
    SpeechRecognizer,
};
pub use streaming::StreamingRecognizer;
pub use synthesizer::{CommandSynthesizer, SilentSynthesizer, SpeechSynthesizer, VoiceSettings};
pub use transcriber::{HttpTranscriber, Transcriber, TranscriptionConfig};
pub use vad::{UtteranceDetector, VadConfig};

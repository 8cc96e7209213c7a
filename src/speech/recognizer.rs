//! Recognizer capability and its event protocol
//!
//! Each listening session gets a fresh [`SessionId`]; every event a
//! recognizer emits carries it, so the consumer can drop anything that
//! arrives from a session it has already moved past. A session emits
//! `Started`, then exactly one outcome (`Result`, `NoSpeech` or `Error`),
//! then `Ended`. A recognizer that closes the microphone before its outcome
//! is known emits `SpeechEnded` first.

use super::transcriber::Transcriber;
use super::vad::{contains_speech, VadConfig};
use crate::audio::{encode_wav, CAPTURE_FORMAT};
use crate::{MurmurError, RecognitionError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEventKind {
    Started,
    /// The microphone is closed; the outcome is still being worked out
    SpeechEnded,
    /// Final recognized text for the session
    Result(String),
    /// The session finished without any speech
    NoSpeech,
    Error(RecognitionError),
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizerEvent {
    pub session: SessionId,
    pub kind: RecognizerEventKind,
}

/// Emits events for one session into the consumer's channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionId,
    tx: UnboundedSender<RecognizerEvent>,
}

impl EventSink {
    pub fn new(session: SessionId, tx: UnboundedSender<RecognizerEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Returns false once the consumer is gone
    pub fn emit(&self, kind: RecognizerEventKind) -> bool {
        let event = RecognizerEvent {
            session: self.session,
            kind,
        };
        if self.tx.send(event).is_err() {
            debug!("Recognizer event dropped, consumer closed (session {})", self.session);
            return false;
        }
        true
    }

    pub fn started(&self) -> bool {
        self.emit(RecognizerEventKind::Started)
    }

    pub fn speech_ended(&self) -> bool {
        self.emit(RecognizerEventKind::SpeechEnded)
    }

    pub fn ended(&self) -> bool {
        self.emit(RecognizerEventKind::Ended)
    }

    pub fn error(&self, error: RecognitionError) -> bool {
        self.emit(RecognizerEventKind::Error(error))
    }
}

/// Which transcription strategy the recognizer uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionStrategy {
    /// Listen continuously and finish on end of speech
    #[default]
    Streaming,
    /// Record until stopped, then transcribe the whole file
    Batch,
}

impl fmt::Display for RecognitionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionStrategy::Streaming => write!(f, "streaming"),
            RecognitionStrategy::Batch => write!(f, "batch"),
        }
    }
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    fn strategy(&self) -> RecognitionStrategy;

    /// Begin a session. Any session still running is stopped and discarded
    /// first, without emitting further events.
    async fn start(&self, locale: &str, sink: EventSink) -> Result<()>;

    /// Ask the current session to finalize. Its outcome may still arrive
    /// after this returns.
    async fn stop(&self) -> Result<()>;

    /// Cancel all work; no further events are emitted for any session
    async fn destroy(&self);
}

/// How a recognizer reports a capture that would not start
pub(crate) fn capture_start_error(e: MurmurError) -> MurmurError {
    match e {
        MurmurError::PermissionDenied(detail) => {
            warn!("Capture refused: {}", detail);
            MurmurError::RecognitionFailed(RecognitionError::NoPermission)
        }
        other => other,
    }
}

/// Transcribe one finished utterance and report its outcome followed by `Ended`.
pub(crate) async fn finish_utterance(
    transcriber: &dyn Transcriber,
    samples: Vec<f32>,
    locale: &str,
    vad: &VadConfig,
    sink: &EventSink,
) {
    let outcome = transcribe_samples(transcriber, samples, locale, vad).await;
    match outcome {
        Ok(text) if text.trim().is_empty() => {
            sink.emit(RecognizerEventKind::NoSpeech);
        }
        Ok(text) => {
            sink.emit(RecognizerEventKind::Result(text.trim().to_string()));
        }
        Err(MurmurError::RecognitionFailed(e)) => {
            warn!("Recognition failed for session {}: {}", sink.session(), e);
            sink.error(e);
        }
        Err(e) => {
            warn!("Recognition failed for session {}: {}", sink.session(), e);
            sink.error(RecognitionError::RecognizerUnavailable(e.to_string()));
        }
    }
    sink.ended();
}

async fn transcribe_samples(
    transcriber: &dyn Transcriber,
    samples: Vec<f32>,
    locale: &str,
    vad: &VadConfig,
) -> Result<String> {
    if !contains_speech(&samples, vad) {
        return Ok(String::new());
    }
    let wav = encode_wav(&samples, CAPTURE_FORMAT.sample_rate)?;
    transcriber.transcribe(wav, locale).await
}

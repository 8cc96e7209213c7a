//! Test doubles shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use murmur::llm::prompts::SYSTEM_PROMPT;
use murmur::llm::{ChatMessage, CompletionService, ContextWindow};
use murmur::messages::{KeyValueStore, MemoryStore, Message, PersistenceStore};
use murmur::speech::{
    EventSink, RecognitionStrategy, RecognizerEventKind, SessionId, SpeechRecognizer,
    SpeechSynthesizer, Transcriber,
};
use murmur::state::{ConversationEvent, SessionState};
use murmur::integration::Orchestrator;
use murmur::{MurmurError, RecognitionError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Recognizer driven by the test: it records calls and emits whatever the
/// test tells it to, for any session it has seen.
#[derive(Default)]
pub struct ScriptedRecognizer {
    pub sinks: Mutex<Vec<EventSink>>,
    pub active: Mutex<Option<SessionId>>,
    pub starts: Mutex<usize>,
    pub stops: Mutex<usize>,
    pub destroys: Mutex<usize>,
    pub fail_start: Mutex<Option<MurmurError>>,
}

impl ScriptedRecognizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(err: MurmurError) -> Arc<Self> {
        let recognizer = Self::default();
        *recognizer.fail_start.lock() = Some(err);
        Arc::new(recognizer)
    }

    /// Sink of the n-th started session
    pub fn sink(&self, n: usize) -> EventSink {
        self.sinks.lock()[n].clone()
    }

    pub fn latest(&self) -> EventSink {
        self.sinks
            .lock()
            .last()
            .cloned()
            .expect("no session started")
    }

    pub fn say(&self, text: &str) {
        let sink = self.latest();
        sink.emit(RecognizerEventKind::Result(text.to_string()));
        sink.emit(RecognizerEventKind::Ended);
    }

    pub fn starts(&self) -> usize {
        *self.starts.lock()
    }

    pub fn stops(&self) -> usize {
        *self.stops.lock()
    }

    pub fn destroys(&self) -> usize {
        *self.destroys.lock()
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    fn strategy(&self) -> RecognitionStrategy {
        RecognitionStrategy::Streaming
    }

    async fn start(&self, _locale: &str, sink: EventSink) -> Result<()> {
        if let Some(err) = self.fail_start.lock().clone() {
            return Err(err);
        }
        *self.starts.lock() += 1;
        *self.active.lock() = Some(sink.session());
        sink.started();
        self.sinks.lock().push(sink);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        *self.stops.lock() += 1;
        self.active.lock().take();
        Ok(())
    }

    async fn destroy(&self) {
        *self.destroys.lock() += 1;
        self.active.lock().take();
    }
}

/// Completion service that records every context window it is asked for.
pub struct MockCompletion {
    reply: String,
    pub windows: Mutex<Vec<Vec<ChatMessage>>>,
    gate: Option<Arc<Semaphore>>,
}

impl MockCompletion {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            windows: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    /// Each reply waits for one permit on the returned semaphore
    pub fn gated(reply: &str) -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let completion = Arc::new(Self {
            reply: reply.to_string(),
            windows: Mutex::new(Vec::new()),
            gate: Some(Arc::clone(&gate)),
        });
        (completion, gate)
    }

    pub fn calls(&self) -> usize {
        self.windows.lock().len()
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    async fn complete(&self, user_text: &str, history: &[Message]) -> String {
        let window = ContextWindow::build(SYSTEM_PROMPT, history, user_text);
        self.windows.lock().push(window.into_messages());

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.reply.clone()
    }
}

/// Synthesizer that records what it was asked to say
#[derive(Default)]
pub struct RecordingSynthesizer {
    pub spoken: Mutex<Vec<String>>,
    pub fail: bool,
}

impl RecordingSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynthesizer {
    async fn speak(&self, text: &str) -> Result<()> {
        self.spoken.lock().push(text.to_string());
        if self.fail {
            return Err(MurmurError::SynthesisFailed("no audio output device".into()));
        }
        Ok(())
    }
}

/// Storage backend whose writes always fail
#[derive(Default)]
pub struct BrokenStore;

#[async_trait]
impl KeyValueStore for BrokenStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String) -> Result<()> {
        Err(MurmurError::StorageFailure("disk full".into()))
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        Err(MurmurError::StorageFailure("disk full".into()))
    }
}

/// Transcriber returning a fixed text
pub struct FixedTranscriber(pub String);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, _wav: Vec<u8>, _locale: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Transcriber that takes its time before answering
pub struct SlowTranscriber {
    pub text: String,
    pub delay: Duration,
}

#[async_trait]
impl Transcriber for SlowTranscriber {
    async fn transcribe(&self, _wav: Vec<u8>, _locale: &str) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok(self.text.clone())
    }
}

pub fn memory_store() -> (PersistenceStore, MemoryStore) {
    let backend = MemoryStore::new();
    (PersistenceStore::new(Arc::new(backend.clone())), backend)
}

/// Poll until `check` holds, failing the test after a few seconds
pub async fn wait_until<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_state(orchestrator: &Orchestrator, state: SessionState) {
    wait_until(&format!("state {}", state), || orchestrator.session_state() == state).await;
}

/// Let the event pump drain whatever is queued
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub fn drain_events(orchestrator: &Orchestrator) -> Vec<ConversationEvent> {
    orchestrator.events().try_iter().collect()
}

pub fn recognition_error(events: &[ConversationEvent]) -> Option<RecognitionError> {
    events.iter().find_map(|event| match event {
        ConversationEvent::Error(MurmurError::RecognitionFailed(e)) => Some(e.clone()),
        _ => None,
    })
}

pub fn texts(history: &[Message]) -> Vec<(bool, String)> {
    history
        .iter()
        .map(|m| (m.is_user, m.text.clone()))
        .collect()
}

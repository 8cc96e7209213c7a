//! Conversation orchestrator
//!
//! Owns the Idle / Listening / Processing state machine and sequences
//! permission, recognition, completion, synthesis and persistence:
//!
//! Voice -> Recognizer -> user Message -> Completion -> reply Message -> Synthesizer
//!
//! Every operation that can suspend runs under one async lock, so no two
//! chains ever interleave on the same orchestrator. Recognizer events arrive
//! on a single channel and are applied by a pump task under the same lock;
//! events from any session other than the current one are discarded.

use super::config::AppConfig;
use crate::audio::{AudioCapture, AudioSource, MicrophonePermission};
use crate::llm::{CompletionClient, CompletionService};
use crate::messages::{FileStore, Message, PersistenceStore};
use crate::speech::{
    BatchRecognizer, CommandSynthesizer, EventSink, HttpTranscriber, RecognitionStrategy,
    RecognizerEvent, RecognizerEventKind, SessionId, SilentSynthesizer, SpeechRecognizer,
    SpeechSynthesizer, StreamingRecognizer,
};
use crate::state::{
    ConversationEvent, ConversationSnapshot, EventPublisher, SessionState,
    SharedConversationState,
};
use crate::{MurmurError, RecognitionError, Result};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What a listening request ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenOutcome {
    Started,
    Stopped,
    /// Refused because a reply is being processed, or nothing to stop
    Ignored,
}

struct Inner {
    state: SharedConversationState,
    publisher: EventPublisher,
    events: Receiver<ConversationEvent>,
    store: PersistenceStore,
    permission: Arc<dyn MicrophonePermission>,
    recognizer: Arc<dyn SpeechRecognizer>,
    completion: Arc<dyn CompletionService>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    locale: String,
    op_lock: tokio::sync::Mutex<()>,
    /// Session whose outcome is still wanted
    current: Mutex<Option<SessionId>>,
    recognizer_tx: Mutex<Option<UnboundedSender<RecognizerEvent>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Explicitly owned conversation coordinator; clones share one instance.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Flip between listening and idle.
    ///
    /// Ignored while a reply is being processed. Stopping keeps the session
    /// current, so an outcome that is still in flight gets processed.
    pub async fn toggle_listening(&self) -> Result<ListenOutcome> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        if inner.state.session().is_processing() {
            debug!("Toggle ignored while processing");
            return Ok(ListenOutcome::Ignored);
        }

        let _guard = inner.op_lock.lock().await;
        inner.ensure_alive()?;
        match inner.state.session() {
            SessionState::Processing => Ok(ListenOutcome::Ignored),
            SessionState::Listening => {
                inner.stop_session().await;
                Ok(ListenOutcome::Stopped)
            }
            SessionState::Idle => inner.begin_session().await.map(|_| ListenOutcome::Started),
        }
    }

    /// Start listening; an active session is stopped and replaced.
    pub async fn start_listening(&self) -> Result<ListenOutcome> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        if inner.state.session().is_processing() {
            debug!("Start ignored while processing");
            return Ok(ListenOutcome::Ignored);
        }

        let _guard = inner.op_lock.lock().await;
        inner.ensure_alive()?;
        match inner.state.session() {
            SessionState::Processing => Ok(ListenOutcome::Ignored),
            SessionState::Listening => {
                debug!("Restarting the active session");
                inner.stop_session().await;
                inner.retire_session();
                inner.begin_session().await.map(|_| ListenOutcome::Started)
            }
            SessionState::Idle => inner.begin_session().await.map(|_| ListenOutcome::Started),
        }
    }

    /// Stop listening if a session is active
    pub async fn stop_listening(&self) -> Result<ListenOutcome> {
        let inner = &self.inner;
        inner.ensure_alive()?;

        let _guard = inner.op_lock.lock().await;
        if !inner.state.session().is_listening() {
            return Ok(ListenOutcome::Ignored);
        }
        inner.stop_session().await;
        Ok(ListenOutcome::Stopped)
    }

    /// Run typed text through the same path as recognized speech.
    ///
    /// Returns `false` when the text was not accepted: it is blank, or a
    /// session is listening or processing.
    pub async fn submit_text(&self, text: &str) -> Result<bool> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        let text = text.trim();
        if text.is_empty() || !inner.state.session().is_idle() {
            return Ok(false);
        }

        let _guard = inner.op_lock.lock().await;
        inner.ensure_alive()?;
        if !inner.state.session().is_idle() {
            return Ok(false);
        }
        inner.process_utterance(text.to_string()).await;
        Ok(true)
    }

    /// Empty the history in memory and in storage. Recording is unaffected.
    pub async fn clear_history(&self) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_alive()?;

        let _guard = inner.op_lock.lock().await;
        if inner.state.read().history.is_empty() {
            debug!("History already empty");
            return Ok(());
        }

        inner.state.write().history.clear();
        inner.publisher.publish(ConversationEvent::HistoryCleared);
        info!("Conversation history cleared");

        if let Err(e) = inner.store.clear().await {
            inner.report(as_storage_failure(e));
        }
        Ok(())
    }

    /// Stop any active session and release the recognizer. Idempotent.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.state.write();
            if state.disposed {
                return;
            }
            state.disposed = true;
        }

        let _guard = inner.op_lock.lock().await;
        if inner.state.session().is_listening() {
            if let Err(e) = inner.recognizer.stop().await {
                warn!("Recognizer stop failed during dispose: {}", e);
            }
            inner.set_session(SessionState::Idle);
        }
        inner.retire_session();
        inner.recognizer.destroy().await;

        inner.recognizer_tx.lock().take();
        if let Some(pump) = inner.pump.lock().take() {
            pump.abort();
        }

        inner.publisher.publish(ConversationEvent::Disposed);
        info!("Orchestrator disposed");
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.state.session()
    }

    pub fn history(&self) -> Vec<Message> {
        self.inner.state.history()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.inner.state.snapshot()
    }

    /// Event stream for the presentation layer.
    ///
    /// Receivers share one queue: with several clones, each event goes to one of them.
    pub fn events(&self) -> Receiver<ConversationEvent> {
        self.inner.events.clone()
    }

    pub fn shared_state(&self) -> SharedConversationState {
        self.inner.state.clone()
    }
}

fn as_storage_failure(e: MurmurError) -> MurmurError {
    match e {
        MurmurError::StorageFailure(_) => e,
        other => MurmurError::StorageFailure(other.to_string()),
    }
}

impl Inner {
    fn ensure_alive(&self) -> Result<()> {
        if self.state.is_disposed() {
            return Err(MurmurError::Disposed);
        }
        Ok(())
    }

    fn set_session(&self, session: SessionState) {
        {
            let mut state = self.state.write();
            if state.session == session {
                return;
            }
            state.session = session;
        }
        debug!("Session state -> {}", session);
        self.publisher.publish(ConversationEvent::StateChanged(session));
    }

    /// Best-effort failures are announced and the conversation carries on;
    /// anything else is recorded as the last error.
    fn report(&self, err: MurmurError) {
        if err.is_best_effort() {
            warn!("Best-effort operation failed: {}", err);
            self.publisher.publish(ConversationEvent::BestEffortFailure(err));
            return;
        }
        error!(recoverable = err.is_recoverable(), "{}", err);
        self.state.write().last_error = Some(err.clone());
        self.publisher.publish(ConversationEvent::Error(err));
    }

    fn retire_session(&self) {
        self.current.lock().take();
    }

    async fn begin_session(&self) -> Result<()> {
        self.state.write().last_error = None;

        if !self.permission.request().await.is_granted() {
            let err = MurmurError::PermissionDenied("microphone access was not granted".into());
            self.report(err.clone());
            return Err(err);
        }

        let tx = self
            .recognizer_tx
            .lock()
            .clone()
            .ok_or(MurmurError::Disposed)?;
        let session = SessionId::new();
        *self.current.lock() = Some(session);

        if let Err(e) = self.recognizer.start(&self.locale, EventSink::new(session, tx)).await {
            self.retire_session();
            let err = match e {
                MurmurError::PermissionDenied(_) | MurmurError::RecognitionFailed(_) => e,
                other => MurmurError::RecognitionFailed(RecognitionError::RecognizerUnavailable(
                    other.to_string(),
                )),
            };
            self.report(err.clone());
            return Err(err);
        }

        info!("Listening (session {}, {})", session, self.recognizer.strategy());
        self.set_session(SessionState::Listening);
        Ok(())
    }

    async fn stop_session(&self) {
        if let Err(e) = self.recognizer.stop().await {
            warn!("Recognizer stop failed: {}", e);
        }
        self.set_session(SessionState::Idle);
    }

    async fn handle_recognizer_event(&self, event: RecognizerEvent) {
        let _guard = self.op_lock.lock().await;
        if self.state.is_disposed() {
            return;
        }
        if *self.current.lock() != Some(event.session) {
            debug!("Discarding {:?} from stale session {}", event.kind, event.session);
            return;
        }

        match event.kind {
            RecognizerEventKind::Started => debug!("Recognizer started (session {})", event.session),
            RecognizerEventKind::SpeechEnded => {
                // Like an explicit stop: the session stays current for its outcome
                debug!("End of speech (session {})", event.session);
                self.set_session(SessionState::Idle);
            }
            RecognizerEventKind::Result(text) if !text.trim().is_empty() => {
                self.retire_session();
                self.process_utterance(text.trim().to_string()).await;
            }
            RecognizerEventKind::Result(_) | RecognizerEventKind::NoSpeech => {
                self.retire_session();
                self.set_session(SessionState::Idle);
                self.report(MurmurError::RecognitionFailed(RecognitionError::NoSpeechDetected));
            }
            RecognizerEventKind::Error(e) => {
                self.retire_session();
                self.set_session(SessionState::Idle);
                self.report(MurmurError::RecognitionFailed(e));
            }
            RecognizerEventKind::Ended => {
                self.retire_session();
                self.set_session(SessionState::Idle);
            }
        }
    }

    /// Append the user turn, fetch and append the reply, then speak it.
    async fn process_utterance(&self, text: String) {
        self.set_session(SessionState::Processing);

        let prior = self.state.history();
        self.append_message(Message::user(text.clone())).await;

        let reply = self.completion.complete(&text, &prior).await;
        self.append_message(Message::assistant(reply.clone())).await;

        if let Err(e) = self.synthesizer.speak(&reply).await {
            let err = match e {
                MurmurError::SynthesisFailed(_) => e,
                other => MurmurError::SynthesisFailed(other.to_string()),
            };
            self.report(err);
        }

        self.set_session(SessionState::Idle);
    }

    async fn append_message(&self, message: Message) {
        self.state.write().history.push(message.clone());
        self.publisher
            .publish(ConversationEvent::MessageAppended(message.clone()));

        if let Err(e) = self.store.append(&message).await {
            self.report(as_storage_failure(e));
        }
    }
}

async fn pump_recognizer_events(inner: Weak<Inner>, mut rx: UnboundedReceiver<RecognizerEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_recognizer_event(event).await;
    }
    debug!("Recognizer event pump finished");
}

/// Builder for creating an orchestrator
pub struct OrchestratorBuilder {
    permission: Option<Arc<dyn MicrophonePermission>>,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    completion: Option<Arc<dyn CompletionService>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    store: Option<PersistenceStore>,
    locale: String,
    event_capacity: usize,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            permission: None,
            recognizer: None,
            completion: None,
            synthesizer: None,
            store: None,
            locale: "zh-CN".to_string(),
            event_capacity: 256,
        }
    }

    /// Wire the standard components described by `config`.
    ///
    /// `source` feeds the microphone capture; `permission` guards it.
    pub fn from_config(
        config: &AppConfig,
        source: Arc<dyn AudioSource>,
        permission: Arc<dyn MicrophonePermission>,
    ) -> Result<Self> {
        let completion = CompletionClient::new(config.completion_config())?;

        let capture = AudioCapture::new(
            Arc::clone(&permission),
            source,
            config.storage.recordings_dir.clone(),
        );
        let transcriber = Arc::new(HttpTranscriber::new(config.transcription_config())?);
        let recognizer: Arc<dyn SpeechRecognizer> = match config.recognition.strategy {
            RecognitionStrategy::Streaming => Arc::new(StreamingRecognizer::new(
                capture,
                transcriber,
                config.vad_config(),
            )),
            RecognitionStrategy::Batch => {
                Arc::new(BatchRecognizer::new(capture, transcriber, config.vad_config()))
            }
        };

        let synthesizer: Arc<dyn SpeechSynthesizer> = if config.synthesis.enabled {
            Arc::new(CommandSynthesizer::new(
                config.synthesis.program.clone(),
                config.voice_settings(),
            ))
        } else {
            Arc::new(SilentSynthesizer)
        };

        let backend = FileStore::new(config.storage.data_dir.clone());
        info!("Conversation history kept in {}", backend.dir().display());
        let store = PersistenceStore::new(Arc::new(backend));

        Ok(Self::new()
            .with_permission(permission)
            .with_recognizer(recognizer)
            .with_completion(Arc::new(completion))
            .with_synthesizer(synthesizer)
            .with_store(store)
            .with_locale(config.recognition.locale.clone()))
    }

    pub fn with_permission(mut self, permission: Arc<dyn MicrophonePermission>) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn with_completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn with_store(mut self, store: PersistenceStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Load the stored history and start the recognizer event pump.
    ///
    /// Must be called within a Tokio runtime.
    pub async fn build(self) -> Result<Orchestrator> {
        let recognizer = self
            .recognizer
            .ok_or_else(|| MurmurError::ConfigError("A speech recognizer is required".into()))?;
        let completion = self
            .completion
            .ok_or_else(|| MurmurError::ConfigError("A completion service is required".into()))?;
        let permission = self.permission.unwrap_or_else(default_permission);
        let synthesizer = self
            .synthesizer
            .unwrap_or_else(|| Arc::new(SilentSynthesizer));
        let store = self.store.unwrap_or_else(PersistenceStore::in_memory);

        let (publisher, events) = EventPublisher::new(self.event_capacity);

        let history = match store.try_read_all().await {
            Ok(history) => history,
            Err(e) => {
                let err = as_storage_failure(e);
                warn!("Starting with empty history: {}", err);
                publisher.publish(ConversationEvent::BestEffortFailure(err));
                Vec::new()
            }
        };
        info!("Loaded {} messages of history", history.len());

        let (recognizer_tx, recognizer_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            state: SharedConversationState::with_history(history),
            publisher,
            events,
            store,
            permission,
            recognizer,
            completion,
            synthesizer,
            locale: self.locale,
            op_lock: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
            recognizer_tx: Mutex::new(Some(recognizer_tx)),
            pump: Mutex::new(None),
        });

        let pump = tokio::spawn(pump_recognizer_events(Arc::downgrade(&inner), recognizer_rx));
        *inner.pump.lock() = Some(pump);

        Ok(Orchestrator { inner })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "audio-io")]
fn default_permission() -> Arc<dyn MicrophonePermission> {
    Arc::new(crate::audio::DevicePermission)
}

#[cfg(not(feature = "audio-io"))]
fn default_permission() -> Arc<dyn MicrophonePermission> {
    Arc::new(crate::audio::StaticPermission::granted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NullRecognizer;

    #[async_trait]
    impl SpeechRecognizer for NullRecognizer {
        fn strategy(&self) -> crate::speech::RecognitionStrategy {
            crate::speech::RecognitionStrategy::Batch
        }
        async fn start(&self, _locale: &str, _sink: EventSink) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
        async fn destroy(&self) {}
    }

    struct Echo;

    #[async_trait]
    impl CompletionService for Echo {
        async fn complete(&self, user_text: &str, _history: &[Message]) -> String {
            format!("echo: {}", user_text)
        }
    }

    #[tokio::test]
    async fn test_builder_requires_components() {
        assert!(OrchestratorBuilder::new().build().await.is_err());
        assert!(OrchestratorBuilder::new()
            .with_recognizer(Arc::new(NullRecognizer))
            .build()
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_submit_text_round_trip() {
        let orchestrator = Orchestrator::builder()
            .with_recognizer(Arc::new(NullRecognizer))
            .with_completion(Arc::new(Echo))
            .build()
            .await
            .unwrap();

        assert!(orchestrator.submit_text("  hi  ").await.unwrap());
        assert!(!orchestrator.submit_text("   ").await.unwrap());

        let history = orchestrator.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "hi");
        assert_eq!(history[1].text, "echo: hi");
        assert_eq!(orchestrator.session_state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_operations_after_dispose() {
        let orchestrator = Orchestrator::builder()
            .with_recognizer(Arc::new(NullRecognizer))
            .with_completion(Arc::new(Echo))
            .with_permission(Arc::new(crate::audio::StaticPermission::granted()))
            .build()
            .await
            .unwrap();

        orchestrator.dispose().await;
        assert!(matches!(
            orchestrator.toggle_listening().await,
            Err(MurmurError::Disposed)
        ));
        assert!(matches!(orchestrator.clear_history().await, Err(MurmurError::Disposed)));
        assert!(orchestrator.snapshot().disposed);
    }
}

//! Conversation state shared with the presentation layer
//!
//! The orchestrator is the only writer. Presentation code reads snapshots
//! and listens for [`ConversationEvent`]s to know when to re-render; the
//! shared state stays authoritative if an event is dropped.

use crate::messages::Message;
use crate::MurmurError;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Orchestrator session state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    /// Microphone open, waiting for recognized speech
    Listening,
    /// Waiting for the reply and speaking it
    Processing,
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    pub fn is_listening(&self) -> bool {
        matches!(self, SessionState::Listening)
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, SessionState::Processing)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Listening => write!(f, "Listening"),
            SessionState::Processing => write!(f, "Processing"),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConversationState {
    pub session: SessionState,
    pub history: Vec<Message>,
    /// Last error surfaced to the user, cleared when listening starts
    pub last_error: Option<MurmurError>,
    pub disposed: bool,
}

/// Immutable copy of the conversation state
#[derive(Clone, Debug)]
pub struct ConversationSnapshot {
    pub session: SessionState,
    pub history: Vec<Message>,
    pub last_error: Option<MurmurError>,
    pub disposed: bool,
}

/// Thread-safe shared conversation state
#[derive(Clone, Default)]
pub struct SharedConversationState {
    inner: Arc<RwLock<ConversationState>>,
}

impl SharedConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: Vec<Message>) -> Self {
        let state = ConversationState {
            history,
            ..ConversationState::default()
        };
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, ConversationState> {
        self.inner.read()
    }

    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, ConversationState> {
        self.inner.write()
    }

    /// Get a snapshot of current state (no lock held after return)
    pub fn snapshot(&self) -> ConversationSnapshot {
        let state = self.inner.read();
        ConversationSnapshot {
            session: state.session,
            history: state.history.clone(),
            last_error: state.last_error.clone(),
            disposed: state.disposed,
        }
    }

    pub fn session(&self) -> SessionState {
        self.inner.read().session
    }

    pub fn history(&self) -> Vec<Message> {
        self.inner.read().history.clone()
    }

    pub fn history_len(&self) -> usize {
        self.inner.read().history.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.read().disposed
    }
}

/// Notifications for the presentation layer
#[derive(Clone, Debug)]
pub enum ConversationEvent {
    StateChanged(SessionState),
    MessageAppended(Message),
    HistoryCleared,
    /// A failure the user should see
    Error(MurmurError),
    /// A failure that was logged and swallowed
    BestEffortFailure(MurmurError),
    Disposed,
}

/// Non-blocking event publisher; a full or abandoned channel drops events.
#[derive(Clone)]
pub struct EventPublisher {
    tx: Sender<ConversationEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> (Self, Receiver<ConversationEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx }, rx)
    }

    pub fn publish(&self, event: ConversationEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => debug!("Event channel full, dropping {:?}", event),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

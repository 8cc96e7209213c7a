//! Context window construction for completion requests

use crate::messages::Message;
use serde::{Deserialize, Serialize};

/// Number of most recent history messages sent with each request
pub const CONTEXT_WINDOW_MESSAGES: usize = 20;

/// Role of a turn in the request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A role-tagged turn, serialized as `{"role": ..., "content": ...}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        let role = if message.is_user {
            ChatRole::User
        } else {
            ChatRole::Assistant
        };
        Self::new(role, message.text.clone())
    }
}

/// System instruction, recent history and the pending user turn.
///
/// Older history is left out of the request only; it stays stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextWindow {
    messages: Vec<ChatMessage>,
}

impl ContextWindow {
    /// # Arguments
    /// * `system_prompt` - Instruction placed first
    /// * `history` - Conversation so far, oldest first, without `user_text`
    /// * `user_text` - The new user turn
    pub fn build(system_prompt: &str, history: &[Message], user_text: &str) -> Self {
        let start = history.len().saturating_sub(CONTEXT_WINDOW_MESSAGES);
        let recent = &history[start..];

        let mut messages = Vec::with_capacity(recent.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(recent.iter().map(ChatMessage::from));
        messages.push(ChatMessage::user(user_text));

        Self { messages }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

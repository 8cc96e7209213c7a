//! Remote chat completion
//!
//! Builds the bounded context window from the conversation history, calls
//! the completion endpoint and always produces a reply string.

pub mod client;
pub mod config;
pub mod context;
pub mod prompts;

pub use client::{CompletionClient, CompletionService};
pub use config::CompletionConfig;
pub use context::{ChatMessage, ChatRole, ContextWindow, CONTEXT_WINDOW_MESSAGES};

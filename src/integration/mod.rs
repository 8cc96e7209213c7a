//! Wiring of the conversation pipeline

pub mod config;
pub mod orchestrator;

pub use config::AppConfig;
pub use orchestrator::{ListenOutcome, Orchestrator, OrchestratorBuilder};

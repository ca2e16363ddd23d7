//! Quarry Core Library
//!
//! This crate provides the foundational utilities shared by every Quarry crate:
//! - Error handling (`AppError`, `AppResult`)
//! - Logging infrastructure
//! - Configuration management (workspace, LLM, embedding, store, agent loop)

pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::{AgentSettings, AppConfig, DegradedJudgmentPolicy};
pub use error::{AppError, AppResult};

//! Command handlers for the Quarry CLI.

pub mod ask;
pub mod health;
pub mod knowledge;

pub use ask::AskCommand;
pub use health::HealthCommand;
pub use knowledge::KnowledgeCommand;

//! The agentic question-answering loop.
//!
//! A run retrieves passages for a question, grades them, and either answers
//! from them or rewrites the question and retrieves again, up to a fixed
//! rewrite budget. When nothing sufficient turns up it returns a fallback
//! answer instead of guessing.
//!
//! The loop talks to four collaborators through traits:
//! [`Retriever`], [`RelevanceGrader`], [`QueryRewriter`] and
//! [`AnswerGenerator`]. Production implementations wrap the knowledge store
//! and an [`LlmClient`](quarry_llm::LlmClient); tests swap in scripted ones.
//!
//! # Example
//! ```no_run
//! use quarry_agent::{AgentConfig, Orchestrator};
//! # use std::sync::Arc;
//! # async fn example(
//! #     retriever: Arc<dyn quarry_agent::Retriever>,
//! #     grader: Arc<dyn quarry_agent::RelevanceGrader>,
//! #     rewriter: Arc<dyn quarry_agent::QueryRewriter>,
//! #     generator: Arc<dyn quarry_agent::AnswerGenerator>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::new(
//!     AgentConfig::default(),
//!     retriever,
//!     grader,
//!     rewriter,
//!     generator,
//! )?;
//! let report = orchestrator.answer_question("What is a lifetime?", "rust_book").await?;
//! println!("{}", report.answer.text);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod generator;
pub mod grader;
pub mod orchestrator;
mod prompting;
pub mod retriever;
pub mod rewriter;
pub mod types;

#[cfg(test)]
mod tests;

pub use cancel::CancellationToken;
pub use config::AgentConfig;
pub use error::{RunError, RunResult, Stage};
pub use generator::{AnswerGenerator, LlmGenerator};
pub use grader::{LlmGrader, RelevanceGrader};
pub use orchestrator::{next_state, Orchestrator, RunReport, RunState, StepOutcome};
pub use retriever::{EmbeddingRetriever, Retriever};
pub use rewriter::{LlmRewriter, QueryRewriter};
pub use types::{Answer, EvidenceSet, Passage, Provenance, Query, RelevanceVerdict, TableId};

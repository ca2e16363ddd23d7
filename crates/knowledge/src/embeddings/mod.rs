//! Embedding providers.
//!
//! Texts are embedded once at ingestion and once per query at retrieval;
//! both sides must use the same provider, model and dimensions.

pub mod provider;
pub mod providers;

pub use provider::{create_provider, EmbeddingProvider};

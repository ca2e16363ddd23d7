//! Knowledge store for Quarry.
//!
//! Documents are split into passages, embedded, and written into named
//! tables of a single SQLite file. The agent loop only reads from it through
//! the [`VectorStore`] trait; ingestion and table lifecycle live here.

pub mod embeddings;
pub mod ingest;
pub mod store;
pub mod types;

pub use embeddings::{create_provider, EmbeddingProvider};
pub use ingest::{ingest_paths, ingest_text, IngestOptions};
pub use store::{SqliteStore, VectorStore};
pub use types::{IngestReport, PassageRecord, SearchHit, TableName, TableStats};

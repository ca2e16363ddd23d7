//! Retrieval contract and the embedding + vector store implementation.

use crate::types::{EvidenceSet, Query, TableId};
use quarry_core::AppResult;
use quarry_knowledge::{EmbeddingProvider, VectorStore};
use std::sync::Arc;

/// Fetches candidate passages for a query.
///
/// Implementations return at most `k` passages ordered by descending score,
/// ties in store insertion order. No matches is an empty set, not an error;
/// an unreachable store or unknown table is an error.
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Collaborator name used in errors and logs.
    fn name(&self) -> &str;

    async fn retrieve(&self, query: &Query, table: &TableId, k: usize) -> AppResult<EvidenceSet>;
}

/// Embeds the query text and searches a [`VectorStore`] table.
pub struct EmbeddingRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    min_score: f32,
}

impl EmbeddingRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            min_score: 0.0,
        }
    }

    /// Drop passages scoring below `min_score`.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }
}

#[async_trait::async_trait]
impl Retriever for EmbeddingRetriever {
    fn name(&self) -> &str {
        "embedding-retriever"
    }

    async fn retrieve(&self, query: &Query, table: &TableId, k: usize) -> AppResult<EvidenceSet> {
        let embedding = self.embedder.embed(query.text()).await?;
        let hits = self
            .store
            .search(table, &embedding, k, self.min_score)
            .await?;

        tracing::debug!(
            table = %table,
            generation = query.generation(),
            hits = hits.len(),
            embedder = self.embedder.model_name(),
            "Retrieved passages"
        );

        Ok(EvidenceSet::from_ranked(
            query.generation(),
            hits.into_iter().map(|hit| (hit.text, hit.source, hit.score)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_knowledge::embeddings::providers::trigram::TrigramProvider;
    use quarry_knowledge::{ingest_text, IngestOptions, SqliteStore, TableName};

    async fn seeded_store(embedder: &TrigramProvider) -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let table = TableName::parse("guide").unwrap();
        let options = IngestOptions::default();
        for (source, text) in [
            ("borrow.md", "The borrow checker enforces ownership rules at compile time."),
            ("cargo.md", "Cargo builds crates and resolves dependencies."),
            ("bread.md", "Sourdough starter needs regular feeding."),
        ] {
            ingest_text(store.as_ref(), embedder, &table, source, text, &options)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_retrieve_ranks_best_match_first() {
        let embedder = TrigramProvider::new(256);
        let store = seeded_store(&embedder).await;
        let retriever = EmbeddingRetriever::new(Arc::new(TrigramProvider::new(256)), store);

        let query = Query::new("how does the borrow checker enforce ownership");
        let table = TableName::parse("GUIDE").unwrap();
        let evidence = retriever.retrieve(&query, &table, 2).await.unwrap();

        assert!(evidence.len() <= 2);
        assert_eq!(evidence.passages()[0].source, "borrow.md");
        assert_eq!(evidence.passages()[0].rank, 0);
        assert_eq!(evidence.generation(), 0);
    }

    #[tokio::test]
    async fn test_threshold_can_empty_the_result() {
        let embedder = TrigramProvider::new(256);
        let store = seeded_store(&embedder).await;
        let retriever = EmbeddingRetriever::new(Arc::new(TrigramProvider::new(256)), store)
            .with_min_score(0.99);

        let query = Query::new("quantum chromodynamics");
        let table = TableName::parse("guide").unwrap();
        let evidence = retriever.retrieve(&query, &table, 3).await.unwrap();
        assert!(evidence.is_empty());
    }

    #[tokio::test]
    async fn test_missing_table_is_an_error() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let retriever = EmbeddingRetriever::new(Arc::new(TrigramProvider::new(32)), store);

        let table = TableName::parse("absent").unwrap();
        let result = retriever.retrieve(&Query::new("anything"), &table, 3).await;
        assert!(result.is_err());
    }
}

//! Ingestion: read text files, split into passages, embed, write to a table.

use crate::embeddings::EmbeddingProvider;
use crate::store::VectorStore;
use crate::types::{IngestReport, PassageRecord, TableName};
use chrono::Utc;
use quarry_core::{AppError, AppResult};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use text_splitter::{ChunkConfig, TextSplitter};

/// Ingestion tuning.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Target passage size in characters
    pub chunk_size: usize,

    /// Characters shared between neighbouring passages
    pub chunk_overlap: usize,

    /// File extensions picked up when walking directories
    pub extensions: Vec<String>,

    /// Passages embedded and written per round-trip
    pub batch_size: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            extensions: ["md", "markdown", "txt", "text", "rst"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            batch_size: 64,
        }
    }
}

impl IngestOptions {
    fn splitter(&self) -> AppResult<TextSplitter<text_splitter::Characters>> {
        if self.chunk_size == 0 {
            return Err(AppError::Knowledge("Chunk size must be positive".to_string()));
        }

        let config = ChunkConfig::new(self.chunk_size)
            .with_overlap(self.chunk_overlap)
            .map_err(|e| AppError::Knowledge(format!("Invalid chunking options: {}", e)))?;
        Ok(TextSplitter::new(config))
    }

    fn wants(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// Stable passage id: same source and text always map to the same row.
fn passage_id(source: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Expand files and directories into the list of files to read.
fn collect_files(paths: &[PathBuf], options: &IngestOptions) -> AppResult<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if !path.exists() {
            return Err(AppError::Knowledge(format!(
                "Path does not exist: {}",
                path.display()
            )));
        }

        if path.is_file() {
            files.push(path.clone());
            continue;
        }

        for entry in walkdir::WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && options.wants(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Split, embed and store one document. Returns the number of passages written.
///
/// Passages previously stored for `source` are replaced, so an edited
/// document leaves no stale text behind.
pub async fn ingest_text(
    store: &dyn VectorStore,
    embedder: &dyn EmbeddingProvider,
    table: &TableName,
    source: &str,
    text: &str,
    options: &IngestOptions,
) -> AppResult<usize> {
    let splitter = options.splitter()?;
    let passages: Vec<&str> = splitter
        .chunks(text)
        .filter(|chunk| !chunk.trim().is_empty())
        .collect();

    let batch_size = options.batch_size.max(1);
    let mut batches = Vec::new();
    for (batch_index, batch) in passages.chunks(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|s| s.to_string()).collect();
        let embeddings = embedder.embed_batch(&texts).await?;

        if embeddings.len() != texts.len() {
            return Err(AppError::Knowledge(format!(
                "Embedder returned {} vectors for {} passages",
                embeddings.len(),
                texts.len()
            )));
        }

        let indexed_at = Utc::now();
        let base = batch_index * batch_size;
        let records: Vec<PassageRecord> = texts
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(offset, (text, embedding))| PassageRecord {
                id: passage_id(source, &text),
                source: source.to_string(),
                position: (base + offset) as u32,
                text,
                embedding,
                indexed_at,
            })
            .collect();
        batches.push(records);
    }

    // Embedding failures above leave the old passages in place.
    store.delete_source(table, source).await?;

    let mut written = 0;
    for records in &batches {
        written += store.insert(table, records).await?;
    }

    tracing::debug!(source, table = %table, passages = written, "Ingested document");
    Ok(written)
}

/// Ingest files and directories into `table`.
///
/// Files that are not valid UTF-8 are skipped and counted, not fatal.
pub async fn ingest_paths(
    store: &dyn VectorStore,
    embedder: &dyn EmbeddingProvider,
    table: &TableName,
    paths: &[PathBuf],
    options: &IngestOptions,
) -> AppResult<IngestReport> {
    // Fail on bad options before touching any file
    options.splitter()?;

    let files = collect_files(paths, options)?;
    tracing::info!(table = %table, files = files.len(), "Starting ingestion");

    let mut report = IngestReport::default();
    for file in files {
        let text = match tokio::fs::read_to_string(&file).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", file.display(), e);
                report.files_skipped += 1;
                continue;
            }
        };

        let source = file.to_string_lossy().to_string();
        report.passages_written +=
            ingest_text(store, embedder, table, &source, &text, options).await?;
        report.files_read += 1;
    }

    tracing::info!(
        table = %table,
        files = report.files_read,
        skipped = report.files_skipped,
        passages = report.passages_written,
        "Ingestion complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::providers::trigram::TrigramProvider;
    use crate::store::SqliteStore;
    use std::fs;
    use tempfile::TempDir;

    fn options(chunk_size: usize, overlap: usize) -> IngestOptions {
        IngestOptions {
            chunk_size,
            chunk_overlap: overlap,
            ..Default::default()
        }
    }

    #[test]
    fn test_passage_id_is_stable() {
        assert_eq!(passage_id("a.md", "text"), passage_id("a.md", "text"));
        assert_ne!(passage_id("a.md", "text"), passage_id("b.md", "text"));
        assert_eq!(passage_id("a.md", "text").len(), 64);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        assert!(options(100, 200).splitter().is_err());
        assert!(options(0, 0).splitter().is_err());
        assert!(options(100, 20).splitter().is_ok());
    }

    #[tokio::test]
    async fn test_ingest_directory() {
        let temp = TempDir::new().unwrap();
        let docs = temp.path().join("docs");
        fs::create_dir_all(docs.join(".git")).unwrap();
        let intro: String = (0..20)
            .map(|i| format!("Sentence {} is about memory safety in Rust. ", i))
            .collect();
        fs::write(docs.join("intro.md"), intro).unwrap();
        fs::write(docs.join("notes.txt"), "Cargo is the Rust package manager.").unwrap();
        fs::write(docs.join("image.png"), [0u8, 159, 146, 150]).unwrap();
        fs::write(docs.join(".git/config.md"), "hidden").unwrap();

        let store = SqliteStore::in_memory().unwrap();
        let embedder = TrigramProvider::new(64);
        let table = TableName::parse("docs").unwrap();

        let report = ingest_paths(&store, &embedder, &table, &[docs], &options(200, 40))
            .await
            .unwrap();

        assert_eq!(report.files_read, 2);
        assert!(report.passages_written > 2);
        assert_eq!(
            store.count(&table).await.unwrap(),
            report.passages_written as u64
        );
    }

    #[tokio::test]
    async fn test_reingest_does_not_duplicate() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("faq.md");
        fs::write(&file, "Quarry answers questions from your documents.").unwrap();

        let store = SqliteStore::in_memory().unwrap();
        let embedder = TrigramProvider::new(64);
        let table = TableName::parse("faq").unwrap();
        let paths = vec![file];

        ingest_paths(&store, &embedder, &table, &paths, &IngestOptions::default())
            .await
            .unwrap();
        ingest_paths(&store, &embedder, &table, &paths, &IngestOptions::default())
            .await
            .unwrap();

        assert_eq!(store.count(&table).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_path_errors() {
        let store = SqliteStore::in_memory().unwrap();
        let embedder = TrigramProvider::new(16);
        let table = TableName::parse("docs").unwrap();

        let result = ingest_paths(
            &store,
            &embedder,
            &table,
            &[PathBuf::from("/definitely/not/here")],
            &IngestOptions::default(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ingested_text_is_searchable() {
        let store = SqliteStore::in_memory().unwrap();
        let embedder = TrigramProvider::new(256);
        let table = TableName::parse("kb").unwrap();

        let opts = IngestOptions::default();
        ingest_text(&store, &embedder, &table, "a", "Tokio is an async runtime.", &opts)
            .await
            .unwrap();
        ingest_text(&store, &embedder, &table, "b", "Bread rises with yeast.", &opts)
            .await
            .unwrap();

        let query = embedder.embed("async runtime tokio").await.unwrap();
        let hits = store.search(&table, &query, 1, 0.0).await.unwrap();
        assert_eq!(hits[0].source, "a");
    }

    #[tokio::test]
    async fn test_reingest_edited_text_replaces_old_passages() {
        let store = SqliteStore::in_memory().unwrap();
        let embedder = TrigramProvider::new(256);
        let table = TableName::parse("kb").unwrap();
        let opts = options(40, 0);

        let original = "Tokio is an async runtime. It schedules tasks on worker threads.";
        let edited = "Bread rises with yeast.";
        let first = ingest_text(&store, &embedder, &table, "notes.md", original, &opts)
            .await
            .unwrap();
        assert!(first > 1);
        ingest_text(&store, &embedder, &table, "other.md", "Cargo builds crates.", &opts)
            .await
            .unwrap();

        let second = ingest_text(&store, &embedder, &table, "notes.md", edited, &opts)
            .await
            .unwrap();
        assert_eq!(second, 1);
        assert_eq!(store.count(&table).await.unwrap(), 2);

        let query = embedder.embed("async runtime tokio").await.unwrap();
        let hits = store.search(&table, &query, 10, -1.0).await.unwrap();
        assert!(hits.iter().all(|h| !h.text.contains("Tokio")));
        assert!(hits.iter().any(|h| h.text == edited));
    }
}

//! SQLite-backed vector store with one table per named collection.

use crate::types::{PassageRecord, SearchHit, TableName, TableStats};
use chrono::{DateTime, Utc};
use quarry_core::{AppError, AppResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Read/write access to named collections of embedded passages.
///
/// The agent loop only calls [`VectorStore::search`]; everything else is
/// table lifecycle used by ingestion and the CLI.
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend identifier (e.g., "sqlite").
    fn backend_name(&self) -> &str;

    /// Return up to `k` passages scoring at least `min_score`, best first.
    ///
    /// Ties keep the order the passages were inserted in. A missing table
    /// is an error; a table with no matches yields an empty vector.
    async fn search(
        &self,
        table: &TableName,
        embedding: &[f32],
        k: usize,
        min_score: f32,
    ) -> AppResult<Vec<SearchHit>>;

    /// Insert or update passages, creating the table on first use.
    async fn insert(&self, table: &TableName, records: &[PassageRecord]) -> AppResult<usize>;

    /// Remove every passage that came from `source`. Returns how many were
    /// removed; a missing table removes nothing.
    async fn delete_source(&self, table: &TableName, source: &str) -> AppResult<u64>;

    /// All collections, sorted by name.
    async fn list_tables(&self) -> AppResult<Vec<TableName>>;

    async fn table_exists(&self, table: &TableName) -> AppResult<bool>;

    /// Drop a collection. Returns whether it existed.
    async fn clear(&self, table: &TableName) -> AppResult<bool>;

    /// Number of passages in a collection.
    async fn count(&self, table: &TableName) -> AppResult<u64>;

    async fn stats(&self, table: &TableName) -> AppResult<TableStats>;

    /// Check that the backend answers queries.
    async fn health_check(&self) -> AppResult<()>;
}

/// Map a rusqlite failure into the knowledge error category.
fn sql_err(context: &str) -> impl Fn(rusqlite::Error) -> AppError + '_ {
    move |e| AppError::Knowledge(format!("{}: {}", context, e))
}

/// SQLite vector store.
///
/// All collections share one database file. Similarity is computed by a
/// brute-force cosine scan, which is fine for the corpus sizes a local
/// knowledge base holds.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a store at `db_path`.
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::Knowledge(format!("Failed to create store directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(db_path).map_err(sql_err("Failed to open SQLite store"))?;

        tracing::debug!("Opened SQLite store at {:?}", db_path);
        Ok(Self::from_connection(conn))
    }

    /// Open a throwaway in-memory store.
    pub fn in_memory() -> AppResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(sql_err("Failed to open in-memory store"))?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut Connection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| AppError::Knowledge("SQLite connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| AppError::Knowledge(format!("SQLite task failed: {}", e)))?
    }
}

fn table_exists_sync(conn: &Connection, table: &TableName) -> AppResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table.sql_ident()],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql_err("Failed to look up table"))?;
    Ok(found.is_some())
}

fn require_table(conn: &Connection, table: &TableName) -> AppResult<()> {
    if table_exists_sync(conn, table)? {
        Ok(())
    } else {
        Err(AppError::Knowledge(format!("Table '{}' not found", table)))
    }
}

fn create_table(conn: &Connection, table: &TableName) -> AppResult<()> {
    // Identifiers cannot be bound as parameters; TableName guarantees [a-z0-9_].
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS "{ident}" (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            position INTEGER NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dimensions INTEGER NOT NULL,
            indexed_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS "{ident}_source" ON "{ident}"(source);
        "#,
        ident = table.sql_ident()
    );
    conn.execute_batch(&sql)
        .map_err(sql_err("Failed to create table"))?;
    Ok(())
}

fn stored_dimensions(conn: &Connection, table: &TableName) -> AppResult<Option<usize>> {
    let sql = format!(
        r#"SELECT dimensions FROM "{}" ORDER BY rowid LIMIT 1"#,
        table.sql_ident()
    );
    let dims: Option<i64> = conn
        .query_row(&sql, [], |row| row.get(0))
        .optional()
        .map_err(sql_err("Failed to read table dimensions"))?;
    Ok(dims.map(|d| d as usize))
}

#[async_trait::async_trait]
impl VectorStore for SqliteStore {
    fn backend_name(&self) -> &str {
        "sqlite"
    }

    async fn search(
        &self,
        table: &TableName,
        embedding: &[f32],
        k: usize,
        min_score: f32,
    ) -> AppResult<Vec<SearchHit>> {
        let table = table.clone();
        let query = embedding.to_vec();

        self.with_conn(move |conn| {
            require_table(conn, &table)?;

            if k == 0 {
                return Ok(Vec::new());
            }

            let sql = format!(
                r#"SELECT id, source, text, embedding FROM "{}" ORDER BY rowid"#,
                table.sql_ident()
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(sql_err("Failed to prepare search"))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                })
                .map_err(sql_err("Failed to scan table"))?;

            let mut hits = Vec::new();
            for row in rows {
                let (id, source, text, bytes) = row.map_err(sql_err("Failed to read passage"))?;
                let stored = bytes_to_embedding(&bytes)?;
                if stored.len() != query.len() {
                    return Err(AppError::Knowledge(format!(
                        "Embedding dimension mismatch in table '{}': stored {}, query {}",
                        table,
                        stored.len(),
                        query.len()
                    )));
                }

                let score = cosine_similarity(&query, &stored);
                if score >= min_score {
                    hits.push(SearchHit {
                        id,
                        source,
                        text,
                        score,
                    });
                }
            }

            // Stable sort: equal scores stay in rowid order
            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            hits.truncate(k);

            tracing::debug!(table = %table, hits = hits.len(), k, "Search complete");
            Ok(hits)
        })
        .await
    }

    async fn insert(&self, table: &TableName, records: &[PassageRecord]) -> AppResult<usize> {
        let table = table.clone();
        let records = records.to_vec();

        self.with_conn(move |conn| {
            create_table(conn, &table)?;

            if let (Some(expected), Some(first)) =
                (stored_dimensions(conn, &table)?, records.first())
            {
                if first.embedding.len() != expected {
                    return Err(AppError::Knowledge(format!(
                        "Table '{}' holds {}-dimensional embeddings, got {}",
                        table,
                        expected,
                        first.embedding.len()
                    )));
                }
            }

            let tx = conn
                .transaction()
                .map_err(sql_err("Failed to begin transaction"))?;
            {
                let sql = format!(
                    r#"INSERT INTO "{}" (id, source, position, text, embedding, dimensions, indexed_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                       ON CONFLICT(id) DO UPDATE SET
                           source = excluded.source,
                           position = excluded.position,
                           text = excluded.text,
                           embedding = excluded.embedding,
                           dimensions = excluded.dimensions,
                           indexed_at = excluded.indexed_at"#,
                    table.sql_ident()
                );
                let mut stmt = tx
                    .prepare(&sql)
                    .map_err(sql_err("Failed to prepare insert"))?;

                let dims = records.first().map(|r| r.embedding.len()).unwrap_or(0);
                for record in &records {
                    if record.embedding.len() != dims {
                        return Err(AppError::Knowledge(format!(
                            "Passage '{}' has {} dimensions, expected {}",
                            record.id,
                            record.embedding.len(),
                            dims
                        )));
                    }

                    stmt.execute(params![
                        record.id,
                        record.source,
                        record.position as i64,
                        record.text,
                        embedding_to_bytes(&record.embedding),
                        record.embedding.len() as i64,
                        record.indexed_at.to_rfc3339(),
                    ])
                    .map_err(sql_err("Failed to insert passage"))?;
                }
            }
            tx.commit().map_err(sql_err("Failed to commit insert"))?;

            tracing::debug!(table = %table, count = records.len(), "Inserted passages");
            Ok(records.len())
        })
        .await
    }

    async fn list_tables(&self) -> AppResult<Vec<TableName>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'kb\\_%' ESCAPE '\\' ORDER BY name",
                )
                .map_err(sql_err("Failed to prepare table listing"))?;

            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(sql_err("Failed to list tables"))?;

            let mut tables = Vec::new();
            for name in names {
                let name = name.map_err(sql_err("Failed to read table name"))?;
                if let Some(table) = TableName::from_sql_ident(&name) {
                    tables.push(table);
                }
            }
            Ok(tables)
        })
        .await
    }

    async fn delete_source(&self, table: &TableName, source: &str) -> AppResult<u64> {
        let table = table.clone();
        let source = source.to_string();
        self.with_conn(move |conn| {
            if !table_exists_sync(conn, &table)? {
                return Ok(0);
            }
            let removed = conn
                .execute(
                    &format!(r#"DELETE FROM "{}" WHERE source = ?1"#, table.sql_ident()),
                    [&source],
                )
                .map_err(sql_err("Failed to delete passages"))?;

            if removed > 0 {
                tracing::debug!(table = %table, source = %source, removed, "Removed stale passages");
            }
            Ok(removed as u64)
        })
        .await
    }

    async fn table_exists(&self, table: &TableName) -> AppResult<bool> {
        let table = table.clone();
        self.with_conn(move |conn| table_exists_sync(conn, &table))
            .await
    }

    async fn clear(&self, table: &TableName) -> AppResult<bool> {
        let table = table.clone();
        self.with_conn(move |conn| {
            let existed = table_exists_sync(conn, &table)?;
            conn.execute_batch(&format!(r#"DROP TABLE IF EXISTS "{}";"#, table.sql_ident()))
                .map_err(sql_err("Failed to drop table"))?;

            if existed {
                tracing::info!(table = %table, "Cleared table");
            }
            Ok(existed)
        })
        .await
    }

    async fn count(&self, table: &TableName) -> AppResult<u64> {
        let table = table.clone();
        self.with_conn(move |conn| {
            require_table(conn, &table)?;
            let count: i64 = conn
                .query_row(
                    &format!(r#"SELECT COUNT(*) FROM "{}""#, table.sql_ident()),
                    [],
                    |row| row.get(0),
                )
                .map_err(sql_err("Failed to count passages"))?;
            Ok(count as u64)
        })
        .await
    }

    async fn stats(&self, table: &TableName) -> AppResult<TableStats> {
        let table = table.clone();
        self.with_conn(move |conn| {
            require_table(conn, &table)?;
            let sql = format!(
                r#"SELECT COUNT(*), COUNT(DISTINCT source), MAX(dimensions), MAX(indexed_at) FROM "{}""#,
                table.sql_ident()
            );
            let (passages, sources, dimensions, last_indexed) = conn
                .query_row(&sql, [], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })
                .map_err(sql_err("Failed to collect table stats"))?;

            let last_indexed = last_indexed
                .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
                .map(|ts| ts.with_timezone(&Utc));

            Ok(TableStats {
                name: table,
                passages: passages as u64,
                sources: sources as u64,
                dimensions: dimensions.map(|d| d as usize),
                last_indexed,
            })
        })
        .await
    }

    async fn health_check(&self) -> AppResult<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(sql_err("SQLite health check failed"))?;
            Ok(())
        })
        .await
    }
}

/// Convert embedding vector to bytes for storage.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to embedding vector.
fn bytes_to_embedding(bytes: &[u8]) -> AppResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::Knowledge(
            "Invalid embedding bytes length".to_string(),
        ));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Cosine similarity, 0.0 when either vector has zero norm.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, source: &str, embedding: Vec<f32>) -> PassageRecord {
        PassageRecord {
            id: id.to_string(),
            source: source.to_string(),
            position: 0,
            text: format!("text of {}", id),
            embedding,
            indexed_at: Utc::now(),
        }
    }

    fn table(name: &str) -> TableName {
        TableName::parse(name).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_search_orders_by_score() {
        let store = SqliteStore::in_memory().unwrap();
        let docs = table("docs");
        store
            .insert(
                &docs,
                &[
                    record("far", "a.md", vec![0.0, 1.0, 0.0]),
                    record("near", "b.md", vec![1.0, 0.0, 0.0]),
                    record("mid", "c.md", vec![1.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store.search(&docs, &[1.0, 0.0, 0.0], 3, -1.0).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let store = SqliteStore::in_memory().unwrap();
        let docs = table("docs");
        store
            .insert(
                &docs,
                &[
                    record("first", "a.md", vec![1.0, 0.0]),
                    record("second", "a.md", vec![2.0, 0.0]),
                    record("third", "a.md", vec![3.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store.search(&docs, &[1.0, 0.0], 2, 0.0).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_min_score_filters_to_empty() {
        let store = SqliteStore::in_memory().unwrap();
        let docs = table("docs");
        store
            .insert(&docs, &[record("orthogonal", "a.md", vec![0.0, 1.0])])
            .await
            .unwrap();

        let hits = store.search(&docs, &[1.0, 0.0], 3, 0.5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_missing_table_errors() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store
            .search(&table("nowhere"), &[1.0], 3, 0.0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Table 'nowhere' not found"));
    }

    #[tokio::test]
    async fn test_table_names_are_case_insensitive() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert(&table("Handbook"), &[record("p1", "a.md", vec![1.0, 0.0])])
            .await
            .unwrap();

        assert!(store.table_exists(&table("HANDBOOK")).await.unwrap());
        assert_eq!(store.count(&table("handbook")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reinsert_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let docs = table("docs");
        let batch = [record("p1", "a.md", vec![1.0, 0.0])];

        store.insert(&docs, &batch).await.unwrap();
        store.insert(&docs, &batch).await.unwrap();

        assert_eq!(store.count(&docs).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_source_only_touches_that_source() {
        let store = SqliteStore::in_memory().unwrap();
        let docs = table("docs");
        assert_eq!(store.delete_source(&docs, "a.md").await.unwrap(), 0);

        store
            .insert(
                &docs,
                &[
                    record("a1", "a.md", vec![1.0, 0.0]),
                    record("a2", "a.md", vec![0.0, 1.0]),
                    record("b1", "b.md", vec![1.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.delete_source(&docs, "a.md").await.unwrap(), 2);
        assert_eq!(store.count(&docs).await.unwrap(), 1);

        let hits = store.search(&docs, &[1.0, 0.0], 10, -1.0).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b1"]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let docs = table("docs");
        store
            .insert(&docs, &[record("p1", "a.md", vec![1.0, 0.0])])
            .await
            .unwrap();

        assert!(store
            .insert(&docs, &[record("p2", "a.md", vec![1.0, 0.0, 0.0])])
            .await
            .is_err());
        assert!(store.search(&docs, &[1.0, 0.0, 0.0], 1, 0.0).await.is_err());
    }

    #[tokio::test]
    async fn test_list_clear_and_stats() {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::open(&temp.path().join("nested/store.sqlite")).unwrap();

        store
            .insert(
                &table("beta"),
                &[
                    record("p1", "a.md", vec![1.0, 0.0]),
                    record("p2", "b.md", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store
            .insert(&table("alpha"), &[record("p3", "c.md", vec![1.0, 1.0])])
            .await
            .unwrap();

        let names: Vec<String> = store
            .list_tables()
            .await
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        let stats = store.stats(&table("beta")).await.unwrap();
        assert_eq!(stats.passages, 2);
        assert_eq!(stats.sources, 2);
        assert_eq!(stats.dimensions, Some(2));
        assert!(stats.last_indexed.is_some());

        assert!(store.clear(&table("beta")).await.unwrap());
        assert!(!store.clear(&table("beta")).await.unwrap());
        assert!(!store.table_exists(&table("beta")).await.unwrap());
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.health_check().await.is_ok());
    }

    #[test]
    fn test_embedding_bytes_roundtrip() {
        let embedding = vec![0.25, -1.5, 3.0];
        let bytes = embedding_to_bytes(&embedding);
        assert_eq!(bytes_to_embedding(&bytes).unwrap(), embedding);
        assert!(bytes_to_embedding(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}

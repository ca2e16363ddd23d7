//! Knowledge store types.

use chrono::{DateTime, Utc};
use quarry_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest accepted table name.
const MAX_TABLE_NAME_LEN: usize = 64;

/// SQL identifier prefix for collection tables.
const TABLE_PREFIX: &str = "kb_";

/// A validated, case-folded collection name.
///
/// Names are ASCII alphanumeric or underscore and compare case-insensitively,
/// so `Docs` and `DOCS` address the same table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    /// Validate and normalize a table name.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(AppError::Knowledge("Table name cannot be empty".to_string()));
        }

        if trimmed.len() > MAX_TABLE_NAME_LEN {
            return Err(AppError::Knowledge(format!(
                "Table name '{}' exceeds {} characters",
                trimmed, MAX_TABLE_NAME_LEN
            )));
        }

        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(AppError::Knowledge(format!(
                "Invalid table name '{}': use letters, digits and underscores",
                trimmed
            )));
        }

        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// The canonical (lower-case) name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the backing SQLite table.
    pub(crate) fn sql_ident(&self) -> String {
        format!("{}{}", TABLE_PREFIX, self.0)
    }

    /// Inverse of [`TableName::sql_ident`].
    pub(crate) fn from_sql_ident(ident: &str) -> Option<Self> {
        ident
            .strip_prefix(TABLE_PREFIX)
            .and_then(|name| Self::parse(name).ok())
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TableName {
    type Error = AppError;

    fn try_from(value: String) -> AppResult<Self> {
        Self::parse(&value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

/// One embedded passage as written to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassageRecord {
    /// Content hash; re-ingesting the same passage replaces it
    pub id: String,

    /// Where the passage came from (file path or caller-supplied label)
    pub source: String,

    /// Position of the passage within its source
    pub position: u32,

    /// Passage text
    pub text: String,

    /// Embedding vector
    pub embedding: Vec<f32>,

    /// When the passage was indexed
    pub indexed_at: DateTime<Utc>,
}

/// A passage returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub source: String,
    pub text: String,

    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

/// Per-table statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    pub name: TableName,
    pub passages: u64,
    pub sources: u64,
    pub dimensions: Option<usize>,
    pub last_indexed: Option<DateTime<Utc>>,
}

/// Summary of one ingestion pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub files_read: usize,
    pub files_skipped: usize,
    pub passages_written: usize,
}

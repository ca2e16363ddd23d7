//! Knowledge command handler.
//!
//! Manages the named tables the ask command answers from.

use crate::services;
use clap::{Args, Subcommand};
use quarry_core::{config::AppConfig, AppError, AppResult};
use quarry_knowledge::{ingest_paths, IngestOptions, TableName, VectorStore};
use std::path::PathBuf;

/// Knowledge table management
#[derive(Args, Debug)]
pub struct KnowledgeCommand {
    #[command(subcommand)]
    pub action: KnowledgeAction,
}

#[derive(Subcommand, Debug)]
pub enum KnowledgeAction {
    /// Split, embed and store documents in a table
    Index(KnowledgeIndexCommand),
    /// List tables
    Tables(KnowledgeTablesCommand),
    /// Drop a table and everything in it
    Clear(KnowledgeClearCommand),
    /// Show table statistics
    Stats(KnowledgeStatsCommand),
}

/// Index documents into a table
#[derive(Args, Debug)]
pub struct KnowledgeIndexCommand {
    /// Table name
    pub table: String,

    /// Files or directories to index
    #[arg(long, required = true)]
    pub path: Vec<PathBuf>,

    /// Passage size in characters
    #[arg(long, default_value_t = 1000)]
    pub chunk_size: usize,

    /// Characters shared by neighbouring passages
    #[arg(long, default_value_t = 200)]
    pub overlap: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl KnowledgeIndexCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing knowledge index command for table '{}'", self.table);

        let table = TableName::parse(&self.table)?;
        let store = services::open_store(config)?;
        let embedder = services::embedder(config)?;
        let options = IngestOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.overlap,
            ..Default::default()
        };

        let started = std::time::Instant::now();
        let report =
            ingest_paths(store.as_ref(), embedder.as_ref(), &table, &self.path, &options).await?;
        let duration_secs = started.elapsed().as_secs_f64();

        if self.json {
            let output = serde_json::json!({
                "table": table.as_str(),
                "filesRead": report.files_read,
                "filesSkipped": report.files_skipped,
                "passagesWritten": report.passages_written,
                "durationSecs": duration_secs,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!(
                "Indexed {} files into '{}' ({} passages, {} skipped) in {:.2}s",
                report.files_read,
                table,
                report.passages_written,
                report.files_skipped,
                duration_secs
            );
        }

        Ok(())
    }
}

/// List tables
#[derive(Args, Debug)]
pub struct KnowledgeTablesCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl KnowledgeTablesCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let store = services::open_store(config)?;
        let tables = store.list_tables().await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&tables)?);
        } else if tables.is_empty() {
            println!("No tables. Use 'quarry knowledge index <table> --path <dir>' to create one.");
        } else {
            for table in tables {
                let count = store.count(&table).await?;
                println!("{} ({} passages)", table, count);
            }
        }

        Ok(())
    }
}

/// Clear a table
#[derive(Args, Debug)]
pub struct KnowledgeClearCommand {
    /// Table name
    pub table: String,

    /// Confirm deletion
    #[arg(short, long)]
    pub yes: bool,
}

impl KnowledgeClearCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing knowledge clear command for table '{}'", self.table);

        let table = TableName::parse(&self.table)?;
        if !self.yes {
            return Err(AppError::Config(format!(
                "Refusing to clear '{}' without --yes",
                table
            )));
        }

        let store = services::open_store(config)?;
        if store.clear(&table).await? {
            println!("Table '{}' cleared", table);
        } else {
            println!("Table '{}' does not exist", table);
        }

        Ok(())
    }
}

/// Show table statistics
#[derive(Args, Debug)]
pub struct KnowledgeStatsCommand {
    /// Table name
    pub table: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl KnowledgeStatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let table = TableName::parse(&self.table)?;
        let store = services::open_store(config)?;
        let stats = store.stats(&table).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            println!("Table: {}", stats.name);
            println!("  Passages: {}", stats.passages);
            println!("  Sources: {}", stats.sources);
            if let Some(dimensions) = stats.dimensions {
                println!("  Dimensions: {}", dimensions);
            }
            if let Some(last_indexed) = stats.last_indexed {
                println!("  Last indexed: {}", last_indexed);
            }
        }

        Ok(())
    }
}

impl KnowledgeCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        match &self.action {
            KnowledgeAction::Index(cmd) => cmd.execute(config).await,
            KnowledgeAction::Tables(cmd) => cmd.execute(config).await,
            KnowledgeAction::Clear(cmd) => cmd.execute(config).await,
            KnowledgeAction::Stats(cmd) => cmd.execute(config).await,
        }
    }
}

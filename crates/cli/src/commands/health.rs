//! Health command handler.
//!
//! Probes the LLM backend, the store and the embedder concurrently.

use crate::services;
use clap::Args;
use quarry_core::{config::AppConfig, AppError, AppResult};
use quarry_knowledge::VectorStore;

/// Check that every backend is reachable
#[derive(Args, Debug)]
pub struct HealthCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl HealthCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing health command");

        let llm = services::llm_client(config)?;
        let store = services::open_store(config)?;
        let embedder = services::embedder(config)?;

        let (llm_status, store_status, embedder_status) = futures::join!(
            llm.health_check(),
            store.health_check(),
            embedder.health_check()
        );

        let checks = [
            (format!("llm ({})", llm.provider_name()), llm_status),
            (format!("store ({})", store.backend_name()), store_status),
            (
                format!("embedder ({}/{})", embedder.provider_name(), embedder.model_name()),
                embedder_status,
            ),
        ];
        let healthy = checks.iter().all(|(_, status)| status.is_ok());

        if self.json {
            let components: Vec<serde_json::Value> = checks
                .iter()
                .map(|(name, status)| {
                    serde_json::json!({
                        "component": name,
                        "ok": status.is_ok(),
                        "error": status.as_ref().err().map(|e| e.to_string()),
                    })
                })
                .collect();
            let output = serde_json::json!({ "healthy": healthy, "components": components });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            for (name, status) in &checks {
                match status {
                    Ok(()) => println!("ok    {}", name),
                    Err(e) => println!("FAIL  {}: {}", name, e),
                }
            }
        }

        if healthy {
            Ok(())
        } else {
            Err(AppError::Other("One or more backends are unhealthy".to_string()))
        }
    }
}

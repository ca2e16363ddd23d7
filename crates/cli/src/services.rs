//! Wiring from configuration to the store, embedder, LLM client and
//! orchestrator.

use quarry_agent::{
    AgentConfig, EmbeddingRetriever, LlmGenerator, LlmGrader, LlmRewriter, Orchestrator,
};
use quarry_core::{config::AppConfig, AgentSettings, AppError, AppResult};
use quarry_knowledge::{create_provider, EmbeddingProvider, SqliteStore};
use quarry_llm::{create_client, LlmClient};
use quarry_prompt::{resolve_prompt, GENERATE_PROMPT_ID, GRADE_PROMPT_ID, REWRITE_PROMPT_ID};
use std::sync::Arc;
use std::time::Duration;

/// Open (creating if needed) the workspace's SQLite store.
pub fn open_store(config: &AppConfig) -> AppResult<Arc<SqliteStore>> {
    let path = config.store_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!("Opening store at {}", path.display());
    Ok(Arc::new(SqliteStore::open(&path)?))
}

pub fn embedder(config: &AppConfig) -> AppResult<Arc<dyn EmbeddingProvider>> {
    create_provider(&config.embedding)
}

/// Client for the active LLM provider.
pub fn llm_client(config: &AppConfig) -> AppResult<Arc<dyn LlmClient>> {
    let endpoint = config.provider_endpoint();
    let api_key = config.resolve_api_key(&config.provider);
    let timeout = config.provider_timeout_secs().map(Duration::from_secs);

    create_client(
        &config.provider,
        endpoint.as_deref(),
        api_key.as_deref(),
        timeout,
    )
    .map_err(AppError::Config)
}

/// Assemble an orchestrator over the workspace store and the active LLM.
///
/// Prompts come from `.quarry/prompts` when overridden there.
pub fn orchestrator(config: &AppConfig, settings: &AgentSettings) -> AppResult<Orchestrator> {
    let agent_config = AgentConfig::from_settings(settings)?;
    let store = open_store(config)?;
    let llm = llm_client(config)?;
    let workspace = &config.workspace;

    let retriever =
        EmbeddingRetriever::new(embedder(config)?, store).with_min_score(settings.min_score);
    let grader = LlmGrader::new(
        llm.clone(),
        &config.model,
        resolve_prompt(workspace, GRADE_PROMPT_ID)?,
    );
    let rewriter = LlmRewriter::new(
        llm.clone(),
        &config.model,
        resolve_prompt(workspace, REWRITE_PROMPT_ID)?,
    );
    let generator = LlmGenerator::new(
        llm,
        &config.model,
        resolve_prompt(workspace, GENERATE_PROMPT_ID)?,
    );

    Orchestrator::new(
        agent_config,
        Arc::new(retriever),
        Arc::new(grader),
        Arc::new(rewriter),
        Arc::new(generator),
    )
}

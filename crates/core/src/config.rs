//! Configuration management for Quarry.
//!
//! This module handles loading and merging configuration from multiple sources:
//! - Built-in defaults
//! - Config files (.quarry/config.yaml)
//! - Environment variables
//! - Command-line flags
//!
//! The configuration is workspace-centric, with the store, prompt overrides
//! and config file all living under `.quarry/`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .quarry/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Completion provider used for grading, rewriting and generation
    pub provider: String,

    /// Completion model identifier
    pub model: String,

    /// API key for the LLM provider
    pub api_key: Option<String>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// LLM provider configurations
    pub llm: Option<LlmConfig>,

    /// Embedding settings
    pub embedding: EmbeddingSettings,

    /// Vector store settings
    pub store: StoreSettings,

    /// Agentic loop settings
    pub agent: AgentSettings,
}

/// LLM configuration from config.yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(rename = "activeProvider")]
    pub active_provider: String,

    pub providers: HashMap<String, ProviderConfig>,
}

/// Provider-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderConfig {
    OpenAI {
        #[serde(rename = "apiKeyEnv")]
        api_key_env: String,
        model: String,
        endpoint: Option<String>,
    },
    Ollama {
        endpoint: String,
        model: String,
        /// Request timeout in seconds
        timeout: Option<u64>,
    },
}

impl ProviderConfig {
    /// Endpoint override for this provider, if any.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            ProviderConfig::Ollama { endpoint, .. } => Some(endpoint.as_str()),
            ProviderConfig::OpenAI { endpoint, .. } => endpoint.as_deref(),
        }
    }

    /// Model configured for this provider.
    pub fn model(&self) -> &str {
        match self {
            ProviderConfig::Ollama { model, .. } | ProviderConfig::OpenAI { model, .. } => model,
        }
    }
}

/// Embedding settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingSettings {
    /// Provider name: "trigram" (offline) or "ollama"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Model identifier (provider-specific)
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding vector dimensions
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,

    /// Endpoint for remote providers
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_embedding_provider() -> String {
    "trigram".to_string()
}

fn default_embedding_model() -> String {
    "trigram-v1".to_string()
}

fn default_embedding_dimensions() -> usize {
    384
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            endpoint: None,
        }
    }
}

/// Vector store settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSettings {
    /// Path to the SQLite store (relative paths resolve against the workspace)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// What to do when the relevance judgment service fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradedJudgmentPolicy {
    /// Treat the failed judgment as an "insufficient" verdict and keep going
    TreatAsInsufficient,

    /// Fail the run with the judgment error
    #[default]
    Propagate,
}

impl DegradedJudgmentPolicy {
    /// Parse a policy from a CLI/environment string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "treat-as-insufficient" | "insufficient" | "degraded" => {
                Some(Self::TreatAsInsufficient)
            }
            "propagate" | "strict" => Some(Self::Propagate),
            _ => None,
        }
    }

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TreatAsInsufficient => "treat-as-insufficient",
            Self::Propagate => "propagate",
        }
    }
}

/// Agentic loop settings (the `agent:` section of config.yaml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    /// Maximum number of query rewrites per run
    #[serde(default = "default_max_rewrites")]
    pub max_rewrites: u32,

    /// Passages requested from the retriever per generation
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,

    /// Policy for failed relevance judgments
    #[serde(default)]
    pub degraded_judgment_policy: DegradedJudgmentPolicy,

    /// Per-collaborator-call timeout in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Answer text returned when no sufficient evidence was found
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,

    /// Treat a rewrite identical to its input as "cannot improve"
    #[serde(default = "default_true")]
    pub skip_unchanged_rewrites: bool,

    /// Store-side similarity threshold; passages scoring below are dropped
    #[serde(default)]
    pub min_score: f32,
}

fn default_max_rewrites() -> u32 {
    2
}

fn default_retrieval_k() -> usize {
    3
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

/// Default fallback answer text.
pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "I could not find enough information in the knowledge base to answer this question.";

fn default_fallback_message() -> String {
    DEFAULT_FALLBACK_MESSAGE.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_rewrites: default_max_rewrites(),
            retrieval_k: default_retrieval_k(),
            degraded_judgment_policy: DegradedJudgmentPolicy::default(),
            call_timeout_ms: default_call_timeout_ms(),
            fallback_message: default_fallback_message(),
            skip_unchanged_rewrites: true,
            min_score: 0.0,
        }
    }
}

impl AgentSettings {
    /// Validate the loop settings.
    pub fn validate(&self) -> AppResult<()> {
        if self.retrieval_k == 0 {
            return Err(AppError::Config(
                "agent.retrievalK must be a positive integer".to_string(),
            ));
        }

        if self.call_timeout_ms == 0 {
            return Err(AppError::Config(
                "agent.callTimeoutMs must be greater than zero".to_string(),
            ));
        }

        if self.fallback_message.trim().is_empty() {
            return Err(AppError::Config(
                "agent.fallbackMessage cannot be empty".to_string(),
            ));
        }

        if !(-1.0..=1.0).contains(&self.min_score) {
            return Err(AppError::Config(format!(
                "agent.minScore must be within [-1, 1], got {}",
                self.min_score
            )));
        }

        Ok(())
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    llm: Option<LlmConfig>,
    workspace: Option<WorkspaceConfig>,
    logging: Option<LoggingConfig>,
    embedding: Option<EmbeddingSettings>,
    store: Option<StoreSettings>,
    agent: Option<AgentSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            provider: "ollama".to_string(),
            model: "llama3.1".to_string(),
            api_key: None,
            log_level: None,
            verbose: false,
            no_color: false,
            llm: None,
            embedding: EmbeddingSettings::default(),
            store: StoreSettings::default(),
            agent: AgentSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the YAML config file and environment.
    ///
    /// Environment variables:
    /// - `QUARRY_WORKSPACE`: Override workspace path
    /// - `QUARRY_CONFIG`: Path to config file
    /// - `QUARRY_PROVIDER`: LLM provider
    /// - `QUARRY_MODEL`: Model identifier
    /// - `QUARRY_API_KEY`: API key
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    pub fn load() -> AppResult<Self> {
        Self::load_with(None, None)
    }

    /// Load configuration with an explicit workspace and config file.
    ///
    /// Explicit paths win over `QUARRY_WORKSPACE` and `QUARRY_CONFIG`, and
    /// are resolved before the YAML file is chosen, so `--workspace` picks up
    /// that workspace's `.quarry/config.yaml` and `--config` is merged.
    pub fn load_with(workspace: Option<PathBuf>, config_file: Option<PathBuf>) -> AppResult<Self> {
        let mut config = Self::default();

        if let Some(workspace) = workspace {
            config.workspace = workspace;
        } else if let Ok(workspace) = std::env::var("QUARRY_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Some(config_file) = config_file {
            config.config_file = Some(config_file);
        } else if let Ok(config_file) = std::env::var("QUARRY_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.quarry_dir().join("config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Ok(provider) = std::env::var("QUARRY_PROVIDER") {
            config.provider = provider;
        }

        if let Ok(model) = std::env::var("QUARRY_MODEL") {
            config.model = model;
        }

        config.api_key = std::env::var("QUARRY_API_KEY").ok();
        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        self.merge_yaml_str(&contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config file {:?}: {}", path, e)))
    }

    /// Merge YAML configuration text into this config.
    pub fn merge_yaml_str(&self, contents: &str) -> AppResult<Self> {
        let config_file: ConfigFile = serde_yaml::from_str(contents)?;

        let mut result = self.clone();

        if let Some(ws) = config_file.workspace {
            if let Some(path) = ws.path {
                result.workspace = PathBuf::from(path);
            }
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(llm) = config_file.llm {
            result.provider = llm.active_provider.clone();

            if let Some(provider_config) = llm.providers.get(&llm.active_provider) {
                result.model = provider_config.model().to_string();
            }

            result.llm = Some(llm);
        }

        if let Some(embedding) = config_file.embedding {
            result.embedding = embedding;
        }

        if let Some(store) = config_file.store {
            result.store = store;
        }

        if let Some(agent) = config_file.agent {
            result.agent = agent;
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// CLI flags take precedence over environment variables and YAML.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = provider {
            self.provider = provider;
        }

        if let Some(model) = model {
            self.model = model;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Get the path to the .quarry directory.
    pub fn quarry_dir(&self) -> PathBuf {
        self.workspace.join(".quarry")
    }

    /// Ensure the .quarry directory exists.
    pub fn ensure_quarry_dir(&self) -> AppResult<()> {
        let quarry_dir = self.quarry_dir();
        if !quarry_dir.exists() {
            std::fs::create_dir_all(&quarry_dir).map_err(|e| {
                AppError::Config(format!("Failed to create .quarry directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Resolve the SQLite store path.
    pub fn store_path(&self) -> PathBuf {
        match self.store.path {
            Some(ref path) if path.is_absolute() => path.clone(),
            Some(ref path) => self.workspace.join(path),
            None => self.quarry_dir().join("store.sqlite"),
        }
    }

    /// Get a provider configuration by name.
    pub fn get_provider_config(&self, provider: &str) -> Option<ProviderConfig> {
        self.llm
            .as_ref()
            .and_then(|llm| llm.providers.get(provider).cloned())
    }

    /// Endpoint configured for the active provider, if any.
    pub fn provider_endpoint(&self) -> Option<String> {
        self.get_provider_config(&self.provider)
            .and_then(|pc| pc.endpoint().map(str::to_string))
    }

    /// Request timeout configured for the active provider, in seconds.
    pub fn provider_timeout_secs(&self) -> Option<u64> {
        match self.get_provider_config(&self.provider) {
            Some(ProviderConfig::Ollama { timeout, .. }) => timeout,
            _ => None,
        }
    }

    /// Resolve API key from the explicit override or the provider's env var.
    pub fn resolve_api_key(&self, provider: &str) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }

        match self.get_provider_config(provider) {
            Some(ProviderConfig::OpenAI { api_key_env, .. }) => std::env::var(api_key_env).ok(),
            _ => None,
        }
    }

    /// Validate configuration for the active provider and the agent loop.
    pub fn validate(&self) -> AppResult<()> {
        let known_providers = ["ollama", "openai"];

        if !known_providers.contains(&self.provider.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown provider: {}. Supported: {}",
                self.provider,
                known_providers.join(", ")
            )));
        }

        if let Some(ProviderConfig::OpenAI { api_key_env, .. }) =
            self.get_provider_config(&self.provider)
        {
            if self.api_key.is_none() && std::env::var(&api_key_env).is_err() {
                return Err(AppError::Config(format!(
                    "API key not found in environment variable: {}",
                    api_key_env
                )));
            }
        }

        if self.embedding.dimensions == 0 {
            return Err(AppError::Config(
                "embedding.dimensions must be greater than zero".to_string(),
            ));
        }

        self.agent.validate()
    }
}

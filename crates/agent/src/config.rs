//! Orchestrator configuration.

use quarry_core::config::{AgentSettings, DegradedJudgmentPolicy, DEFAULT_FALLBACK_MESSAGE};
use quarry_core::{AppError, AppResult};
use std::time::Duration;

/// Settings the orchestrator reads on every run.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Rewrites allowed per run; retrievals are bounded by `max_rewrites + 1`
    pub max_rewrites: u32,

    /// Passages requested per retrieval
    pub retrieval_k: usize,

    pub degraded_judgment_policy: DegradedJudgmentPolicy,

    /// Applied to each collaborator call independently
    pub call_timeout: Duration,

    pub fallback_message: String,

    /// Treat a rewrite identical to its input as "cannot improve"
    pub skip_unchanged_rewrites: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rewrites: 2,
            retrieval_k: 3,
            degraded_judgment_policy: DegradedJudgmentPolicy::Propagate,
            call_timeout: Duration::from_secs(30),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            skip_unchanged_rewrites: true,
        }
    }
}

impl AgentConfig {
    /// Build from the `agent:` section of the application config.
    pub fn from_settings(settings: &AgentSettings) -> AppResult<Self> {
        settings.validate()?;

        Ok(Self {
            max_rewrites: settings.max_rewrites,
            retrieval_k: settings.retrieval_k,
            degraded_judgment_policy: settings.degraded_judgment_policy,
            call_timeout: Duration::from_millis(settings.call_timeout_ms),
            fallback_message: settings.fallback_message.clone(),
            skip_unchanged_rewrites: settings.skip_unchanged_rewrites,
        })
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.retrieval_k == 0 {
            return Err(AppError::Config(
                "retrieval_k must be a positive integer".to_string(),
            ));
        }

        if self.call_timeout.is_zero() {
            return Err(AppError::Config(
                "call timeout must be greater than zero".to_string(),
            ));
        }

        if self.fallback_message.trim().is_empty() {
            return Err(AppError::Config(
                "fallback message cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_max_rewrites(mut self, max_rewrites: u32) -> Self {
        self.max_rewrites = max_rewrites;
        self
    }

    pub fn with_retrieval_k(mut self, retrieval_k: usize) -> Self {
        self.retrieval_k = retrieval_k;
        self
    }

    pub fn with_degraded_judgment_policy(mut self, policy: DegradedJudgmentPolicy) -> Self {
        self.degraded_judgment_policy = policy;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_fallback_message(mut self, message: impl Into<String>) -> Self {
        self.fallback_message = message.into();
        self
    }

    pub fn with_skip_unchanged_rewrites(mut self, skip: bool) -> Self {
        self.skip_unchanged_rewrites = skip;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_settings_defaults() {
        let from_settings = AgentConfig::from_settings(&AgentSettings::default()).unwrap();
        assert_eq!(from_settings, AgentConfig::default());
    }

    #[test]
    fn test_from_settings_converts_timeout() {
        let settings = AgentSettings {
            call_timeout_ms: 1500,
            max_rewrites: 0,
            degraded_judgment_policy: DegradedJudgmentPolicy::TreatAsInsufficient,
            ..Default::default()
        };

        let config = AgentConfig::from_settings(&settings).unwrap();
        assert_eq!(config.call_timeout, Duration::from_millis(1500));
        assert_eq!(config.max_rewrites, 0);
        assert_eq!(
            config.degraded_judgment_policy,
            DegradedJudgmentPolicy::TreatAsInsufficient
        );
    }

    #[test]
    fn test_from_settings_rejects_zero_k() {
        let settings = AgentSettings {
            retrieval_k: 0,
            ..Default::default()
        };
        assert!(AgentConfig::from_settings(&settings).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(AgentConfig::default().validate().is_ok());
        assert!(AgentConfig::default().with_retrieval_k(0).validate().is_err());
        assert!(AgentConfig::default()
            .with_call_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(AgentConfig::default()
            .with_fallback_message("  ")
            .validate()
            .is_err());
    }
}

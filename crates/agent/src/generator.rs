//! Answer synthesis from sufficient evidence.

use crate::prompting;
use crate::types::{EvidenceSet, Query};
use quarry_core::AppResult;
use quarry_llm::LlmClient;
use quarry_prompt::PromptDefinition;
use std::sync::Arc;

/// Writes the final answer text from a query and its evidence.
///
/// Only called with non-empty evidence.
#[async_trait::async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Collaborator name used in errors and logs.
    fn name(&self) -> &str;

    async fn generate(&self, query: &Query, evidence: &EvidenceSet) -> AppResult<String>;
}

pub struct LlmGenerator {
    llm: Arc<dyn LlmClient>,
    model: String,
    prompt: PromptDefinition,
}

impl LlmGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, prompt: PromptDefinition) -> Self {
        Self {
            llm,
            model: model.into(),
            prompt,
        }
    }
}

#[async_trait::async_trait]
impl AnswerGenerator for LlmGenerator {
    fn name(&self) -> &str {
        "llm-generator"
    }

    async fn generate(&self, query: &Query, evidence: &EvidenceSet) -> AppResult<String> {
        let context = evidence.to_context();
        let raw = prompting::complete(
            self.llm.as_ref(),
            &self.model,
            &self.prompt,
            &[("question", query.original()), ("context", &context)],
            0.0,
        )
        .await?;

        prompting::non_empty(raw, "answer")
    }
}

//! Query reformulation after insufficient evidence.

use crate::prompting;
use crate::types::{EvidenceSet, Query};
use quarry_core::AppResult;
use quarry_llm::LlmClient;
use quarry_prompt::PromptDefinition;
use std::sync::Arc;

/// Produces a new question text from the current query.
///
/// Returning text equal to the input (ignoring case and spacing) means "no
/// better idea"; the loop then stops rewriting.
#[async_trait::async_trait]
pub trait QueryRewriter: Send + Sync {
    /// Collaborator name used in errors and logs.
    fn name(&self) -> &str;

    async fn rewrite(&self, query: &Query, evidence: &EvidenceSet) -> AppResult<String>;
}

/// Rewrites with an LLM call. Temperature defaults to 0.
pub struct LlmRewriter {
    llm: Arc<dyn LlmClient>,
    model: String,
    prompt: PromptDefinition,
    temperature: f32,
}

impl LlmRewriter {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, prompt: PromptDefinition) -> Self {
        Self {
            llm,
            model: model.into(),
            prompt,
            temperature: 0.0,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait::async_trait]
impl QueryRewriter for LlmRewriter {
    fn name(&self) -> &str {
        "llm-rewriter"
    }

    async fn rewrite(&self, query: &Query, evidence: &EvidenceSet) -> AppResult<String> {
        let context = evidence.to_context();
        let raw = prompting::complete(
            self.llm.as_ref(),
            &self.model,
            &self.prompt,
            &[("question", query.text()), ("context", &context)],
            self.temperature,
        )
        .await?;

        let cleaned = clean_rewrite(&raw);
        if cleaned.is_empty() {
            tracing::debug!("Model produced no rewrite, keeping current question");
            return Ok(query.text().to_string());
        }

        tracing::debug!(generation = query.generation(), rewritten = %cleaned, "Rewrote question");
        Ok(cleaned)
    }
}

const LABELS: &[&str] = &[
    "improved question:",
    "rewritten question:",
    "reformulated question:",
    "question:",
];

/// Pull the question out of a chatty completion.
pub(crate) fn clean_rewrite(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    // "Here is an improved question:" on its own line
    let line = match lines.as_slice() {
        [intro, next, ..] if intro.ends_with(':') => next,
        [first, ..] => first,
        [] => return String::new(),
    };

    let mut text = *line;
    for label in LABELS {
        if text
            .get(..label.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(label))
        {
            text = text[label.len()..].trim();
        }
    }

    text.trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '\u{201c}' | '\u{201d}'))
        .trim()
        .to_string()
}

//! Relevance judgment: is the evidence good enough to answer from?

use crate::prompting;
use crate::types::{EvidenceSet, Query, RelevanceVerdict};
use quarry_core::{AppError, AppResult};
use quarry_llm::LlmClient;
use quarry_prompt::PromptDefinition;
use std::sync::Arc;

/// Decides whether an evidence set suffices for a query.
///
/// An unparseable or failed judgment is an error; what happens next is up
/// to the run's degraded-judgment policy.
#[async_trait::async_trait]
pub trait RelevanceGrader: Send + Sync {
    /// Collaborator name used in errors and logs.
    fn name(&self) -> &str;

    async fn grade(&self, query: &Query, evidence: &EvidenceSet) -> AppResult<RelevanceVerdict>;
}

/// Grades with a yes/no LLM call.
pub struct LlmGrader {
    llm: Arc<dyn LlmClient>,
    model: String,
    prompt: PromptDefinition,
}

impl LlmGrader {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, prompt: PromptDefinition) -> Self {
        Self {
            llm,
            model: model.into(),
            prompt,
        }
    }
}

#[async_trait::async_trait]
impl RelevanceGrader for LlmGrader {
    fn name(&self) -> &str {
        "llm-grader"
    }

    async fn grade(&self, query: &Query, evidence: &EvidenceSet) -> AppResult<RelevanceVerdict> {
        if evidence.is_empty() {
            return Ok(RelevanceVerdict::insufficient(evidence.generation())
                .with_rationale("no passages retrieved"));
        }

        let context = evidence.to_context();
        let raw = prompting::complete(
            self.llm.as_ref(),
            &self.model,
            &self.prompt,
            &[("question", query.original()), ("context", &context)],
            0.0,
        )
        .await?;

        let (sufficient, rationale) = parse_verdict(&raw).ok_or_else(|| {
            AppError::Llm(format!(
                "Unrecognized relevance judgment: {}",
                truncate(raw.trim(), 80)
            ))
        })?;

        tracing::debug!(
            generation = evidence.generation(),
            sufficient,
            "Graded evidence"
        );

        let verdict = if sufficient {
            RelevanceVerdict::sufficient(evidence.generation())
        } else {
            RelevanceVerdict::insufficient(evidence.generation())
        };
        Ok(match rationale {
            Some(rationale) => verdict.with_rationale(rationale),
            None => verdict,
        })
    }
}

/// Parse a model's judgment.
///
/// Accepts `{"binary_score": "yes"}` style JSON (string or bool, optionally
/// in a code fence) or plain text starting with yes/no.
pub(crate) fn parse_verdict(raw: &str) -> Option<(bool, Option<String>)> {
    let body = strip_code_fence(raw.trim());

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(text) = value.as_str() {
            return yes_no(text).map(|b| (b, None));
        }
        if let Some(b) = value.as_bool() {
            return Some((b, None));
        }

        let rationale = ["rationale", "reason", "explanation"]
            .iter()
            .find_map(|key| value.get(key).and_then(|v| v.as_str()))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        for key in ["binary_score", "score", "relevant", "sufficient"] {
            let Some(field) = value.get(key) else { continue };
            if let Some(b) = field.as_bool() {
                return Some((b, rationale));
            }
            if let Some(b) = field.as_str().and_then(yes_no) {
                return Some((b, rationale));
            }
        }
        return None;
    }

    let first = body
        .split(|c: char| !c.is_alphanumeric())
        .find(|word| !word.is_empty())?;
    yes_no(first).map(|b| (b, None))
}

fn yes_no(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "relevant" => Some(true),
        "no" | "n" | "false" | "irrelevant" | "not_relevant" => Some(false),
        _ => None,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string, e.g. ```json
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().trim_end_matches("```").trim()
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::doubles::ScriptedLlm;
    use quarry_prompt::{builtin_prompt, GRADE_PROMPT_ID};

    fn evidence() -> EvidenceSet {
        EvidenceSet::from_ranked(
            1,
            vec![(
                "Lifetimes name the scope a reference is valid for.".to_string(),
                "lifetimes.md".to_string(),
                0.8,
            )],
        )
    }

    fn grader(llm: Arc<ScriptedLlm>) -> LlmGrader {
        LlmGrader::new(llm, "test-model", builtin_prompt(GRADE_PROMPT_ID).unwrap())
    }

    #[test]
    fn test_parse_json_string_score() {
        assert_eq!(parse_verdict(r#"{"binary_score": "yes"}"#), Some((true, None)));
        assert_eq!(parse_verdict(r#"{"binary_score": "No"}"#), Some((false, None)));
    }

    #[test]
    fn test_parse_bool_and_rationale() {
        let parsed = parse_verdict(r#"{"binary_score": false, "reason": "off topic"}"#);
        assert_eq!(parsed, Some((false, Some("off topic".to_string()))));
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"binary_score\": \"yes\"}\n```";
        assert_eq!(parse_verdict(raw), Some((true, None)));
    }

    #[test]
    fn test_parse_plain_text() {
        assert_eq!(parse_verdict("Yes, the passage covers it."), Some((true, None)));
        assert_eq!(parse_verdict("no"), Some((false, None)));
        assert_eq!(parse_verdict("maybe"), None);
        assert_eq!(parse_verdict(r#"{"score": "perhaps"}"#), None);
        assert_eq!(parse_verdict(""), None);
    }

    #[tokio::test]
    async fn test_grade_sends_original_question_as_json_request() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(r#"{"binary_score":"yes"}"#.to_string())]));
        let query = Query::new("what is a lifetime").rewritten("rust lifetime annotation");

        let verdict = grader(llm.clone()).grade(&query, &evidence()).await.unwrap();
        assert!(verdict.sufficient);
        assert_eq!(verdict.generation, 1);

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].prompt.contains("what is a lifetime"));
        assert!(requests[0].prompt.contains("[Document 1]"));
        assert_eq!(requests[0].temperature, Some(0.0));
        assert_eq!(requests[0].format, quarry_llm::ResponseFormat::Json);
    }

    #[tokio::test]
    async fn test_empty_evidence_skips_the_model() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let verdict = grader(llm.clone())
            .grade(&Query::new("q"), &EvidenceSet::empty(0))
            .await
            .unwrap();

        assert!(!verdict.sufficient);
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_judgment_is_an_error() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok("I cannot say".to_string())]));
        let result = grader(llm).grade(&Query::new("q"), &evidence()).await;
        assert!(matches!(result, Err(AppError::Llm(_))));
    }
}

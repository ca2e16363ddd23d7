//! Shared plumbing for the LLM-backed collaborators.

use quarry_core::{AppError, AppResult};
use quarry_llm::{LlmClient, LlmRequest};
use quarry_prompt::{build_prompt, PromptDefinition};
use std::collections::HashMap;

/// Render `definition` with `vars` and run it as one completion.
pub(crate) async fn complete(
    llm: &dyn LlmClient,
    model: &str,
    definition: &PromptDefinition,
    vars: &[(&str, &str)],
    temperature: f32,
) -> AppResult<String> {
    let variables: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let built = build_prompt(definition, variables)?;

    let mut request = LlmRequest::new(built.user, model).with_temperature(temperature);
    if let Some(system) = built.system {
        request = request.with_system(system);
    }
    if built.metadata.json_output {
        request = request.with_json_output();
    }

    let response = llm.complete(&request).await?;
    if !response.done {
        tracing::warn!(prompt = %definition.id, "Completion was truncated");
    }
    Ok(response.content)
}

/// Reject an empty completion.
pub(crate) fn non_empty(content: String, what: &str) -> AppResult<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(AppError::Llm(format!("Model returned an empty {}", what)));
    }
    Ok(trimmed.to_string())
}

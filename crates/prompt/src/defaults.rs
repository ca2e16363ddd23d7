//! Built-in prompt definitions for the agent loop.
//!
//! A workspace can override any of these by dropping a YAML file with the
//! same id under `.quarry/prompts/`.

use crate::types::{PromptDefinition, PromptInputSpec, PromptOutputSpec};

/// Relevance grading prompt. Renders `question` and `context`.
pub const GRADE_PROMPT_ID: &str = "agent.grade";

/// Query rewriting prompt. Renders `question` and `context`.
pub const REWRITE_PROMPT_ID: &str = "agent.rewrite";

/// Answer synthesis prompt. Renders `question` and `context`.
pub const GENERATE_PROMPT_ID: &str = "agent.generate";

const GRADE_TEMPLATE: &str = "You are a grader assessing relevance of a retrieved document to a user question.

Here is the retrieved document:

{{context}}

Here is the user question: {{question}}

If the document contains keyword(s) or semantic meaning related to the user question, grade it as relevant.
Give a binary score 'yes' or 'no' score to indicate whether the document is relevant to the question.
Respond only with a JSON object of the form {\"binary_score\": \"yes\"} or {\"binary_score\": \"no\"}.";

const REWRITE_TEMPLATE: &str = "Look at the input and try to reason about the underlying semantic intent / meaning.

Here is the initial question:
-------
{{question}}
-------

Here is the retrieved context that was judged insufficient to answer it:
-------
{{context}}
-------

Formulate an improved question that is more likely to find the missing information. Reply with the improved question only.";

const GENERATE_TEMPLATE: &str = "You are an assistant for question-answering tasks. Use the following pieces of retrieved context to answer the question. If you don't know the answer, just say that you don't know. Use three sentences maximum and keep the answer concise.

Question: {{question}}

Context:
{{context}}

Answer:";

/// IDs of every built-in prompt.
pub fn builtin_prompt_ids() -> &'static [&'static str] {
    &[GRADE_PROMPT_ID, REWRITE_PROMPT_ID, GENERATE_PROMPT_ID]
}

/// Look up a built-in prompt definition by id.
pub fn builtin_prompt(prompt_id: &str) -> Option<PromptDefinition> {
    let (title, template, variables, format): (&str, &str, &[&str], &str) = match prompt_id {
        GRADE_PROMPT_ID => (
            "Grade retrieved evidence",
            GRADE_TEMPLATE,
            &["question", "context"][..],
            "json",
        ),
        REWRITE_PROMPT_ID => (
            "Rewrite question",
            REWRITE_TEMPLATE,
            &["question", "context"][..],
            "text",
        ),
        GENERATE_PROMPT_ID => (
            "Generate grounded answer",
            GENERATE_TEMPLATE,
            &["question", "context"][..],
            "text",
        ),
        _ => return None,
    };

    Some(PromptDefinition {
        id: prompt_id.to_string(),
        title: title.to_string(),
        api_version: "1.0".to_string(),
        created_by: "quarry".to_string(),
        system: None,
        input: PromptInputSpec {
            variables: variables.iter().map(|v| v.to_string()).collect(),
        },
        template: template.to_string(),
        output: PromptOutputSpec {
            format: format.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_builtin_resolves() {
        for id in builtin_prompt_ids() {
            let def = builtin_prompt(id).unwrap();
            assert_eq!(&def.id, id);
            assert!(!def.template.is_empty());
        }
    }

    #[test]
    fn test_grade_prompt_asks_for_json() {
        let def = builtin_prompt(GRADE_PROMPT_ID).unwrap();
        assert!(def.output.is_json());
        assert!(def.template.contains("binary_score"));
    }

    #[test]
    fn test_rewrite_prompt_renders_context() {
        let def = builtin_prompt(REWRITE_PROMPT_ID).unwrap();
        assert_eq!(def.input.variables, vec!["question", "context"]);
        assert!(def.template.contains("{{context}}"));
    }

    #[test]
    fn test_unknown_builtin() {
        assert!(builtin_prompt("agent.summarize").is_none());
    }
}

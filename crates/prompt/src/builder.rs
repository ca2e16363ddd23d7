//! Prompt builder for rendering templates.

use crate::types::{BuiltPrompt, PromptDefinition};
use handlebars::Handlebars;
use quarry_core::{AppError, AppResult};
use std::collections::HashMap;

/// Build a prompt from a definition and input variables.
///
/// Every variable listed in the definition's `input.variables` must be
/// supplied; anything else referenced by the template renders as empty.
///
/// # Example
/// ```no_run
/// use quarry_prompt::{build_prompt, builtin_prompt, REWRITE_PROMPT_ID};
/// use std::collections::HashMap;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let def = builtin_prompt(REWRITE_PROMPT_ID).unwrap();
/// let mut vars = HashMap::new();
/// vars.insert("question".to_string(), "rust ownership?".to_string());
/// vars.insert("context".to_string(), "[1] Borrowing rules.".to_string());
///
/// let built = build_prompt(&def, vars)?;
/// println!("User prompt: {}", built.user);
/// # Ok(())
/// # }
/// ```
pub fn build_prompt(
    definition: &PromptDefinition,
    variables: HashMap<String, String>,
) -> AppResult<BuiltPrompt> {
    tracing::debug!("Building prompt: {}", definition.id);

    if let Some(missing) = definition
        .input
        .variables
        .iter()
        .find(|name| !variables.contains_key(name.as_str()))
    {
        return Err(AppError::Prompt(format!(
            "Prompt '{}' requires variable '{}'",
            definition.id, missing
        )));
    }

    let user = render_template(&definition.template, &variables)?;
    let system = definition
        .system
        .as_deref()
        .map(|s| render_template(s, &variables))
        .transpose()?;

    Ok(BuiltPrompt::new(
        system,
        user,
        definition.id.clone(),
        definition.output.is_json(),
        variables,
    ))
}

/// Render a Handlebars template with variables.
fn render_template(template: &str, variables: &HashMap<String, String>) -> AppResult<String> {
    let mut handlebars = Handlebars::new();

    // Disable HTML escaping for plain text
    handlebars.register_escape_fn(handlebars::no_escape);

    handlebars
        .register_template_string("prompt", template)
        .map_err(|e| AppError::Prompt(format!("Failed to register template: {}", e)))?;

    let rendered = handlebars
        .render("prompt", &variables)
        .map_err(|e| AppError::Prompt(format!("Failed to render template: {}", e)))?;

    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::{builtin_prompt, GENERATE_PROMPT_ID, GRADE_PROMPT_ID};
    use crate::types::{PromptInputSpec, PromptOutputSpec};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_simple_template() {
        let result = render_template("Question: {{question}}", &vars(&[("question", "Hello")]));
        assert_eq!(result.unwrap(), "Question: Hello");
    }

    #[test]
    fn test_render_does_not_escape() {
        let result = render_template("{{context}}", &vars(&[("context", "a < b && \"c\"")]));
        assert_eq!(result.unwrap(), "a < b && \"c\"");
    }

    #[test]
    fn test_build_grade_prompt() {
        let def = builtin_prompt(GRADE_PROMPT_ID).unwrap();
        let built = build_prompt(
            &def,
            vars(&[("question", "What is Rust?"), ("context", "Rust is a language.")]),
        )
        .unwrap();

        assert!(built.user.contains("What is Rust?"));
        assert!(built.user.contains("Rust is a language."));
        assert!(built.metadata.json_output);
        assert_eq!(built.metadata.source_prompt_id, GRADE_PROMPT_ID);
        assert!(built.system.is_none());
    }

    #[test]
    fn test_build_prompt_missing_variable() {
        let def = builtin_prompt(GENERATE_PROMPT_ID).unwrap();
        let result = build_prompt(&def, vars(&[("question", "What is Rust?")]));
        match result {
            Err(AppError::Prompt(msg)) => assert!(msg.contains("context")),
            other => panic!("expected prompt error, got {:?}", other),
        }
    }

    #[test]
    fn test_build_prompt_renders_system() {
        let def = PromptDefinition {
            id: "custom".to_string(),
            title: "Custom".to_string(),
            api_version: "1.0".to_string(),
            created_by: "test".to_string(),
            system: Some("Answer about {{topic}}.".to_string()),
            input: PromptInputSpec::default(),
            template: "{{question}}".to_string(),
            output: PromptOutputSpec {
                format: "text".to_string(),
            },
        };

        let built = build_prompt(&def, vars(&[("topic", "databases"), ("question", "why?")])).unwrap();
        assert_eq!(built.system.as_deref(), Some("Answer about databases."));
        assert_eq!(built.user, "why?");
    }
}

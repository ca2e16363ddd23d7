//! Prompt system for Quarry.
//!
//! This crate provides structured prompt management with:
//! - Built-in definitions for the grade, rewrite and generate steps
//! - YAML overrides under `.quarry/prompts/<id>.yml`
//! - Handlebars template rendering

pub mod builder;
pub mod defaults;
pub mod loader;
pub mod types;

// Re-export main types
pub use builder::build_prompt;
pub use defaults::{
    builtin_prompt, builtin_prompt_ids, GENERATE_PROMPT_ID, GRADE_PROMPT_ID, REWRITE_PROMPT_ID,
};
pub use loader::{list_prompts, load_prompt, resolve_prompt};
pub use types::{
    BuiltPrompt, BuiltPromptMetadata, PromptDefinition, PromptInputSpec, PromptOutputSpec,
};

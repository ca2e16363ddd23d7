//! Ask command handler.
//!
//! Runs the retrieve/grade/rewrite loop for one question against a table.

use crate::services;
use clap::Args;
use quarry_agent::{CancellationToken, RunError, RunReport};
use quarry_core::{config::AppConfig, AppError, AppResult, DegradedJudgmentPolicy};
use std::path::PathBuf;

/// Answer a question from a knowledge table
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub question: Option<String>,

    /// Read the question from a file
    #[arg(short, long, conflicts_with = "question")]
    pub file: Option<PathBuf>,

    /// Knowledge table to answer from
    #[arg(short, long, default_value = "default")]
    pub table: String,

    /// Rewrites allowed before giving up
    #[arg(long)]
    pub max_rewrites: Option<u32>,

    /// Passages retrieved per attempt
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// What a failed relevance judgment means (insufficient, propagate)
    #[arg(long)]
    pub degraded: Option<String>,

    /// Per-call timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    /// Execute the ask command.
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command");
        tracing::debug!("Ask command options: {:?}", self);

        let question = self.question_text()?;
        let settings = self.settings(config)?;
        let orchestrator = services::orchestrator(config, &settings)?;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, abandoning run");
                trigger.cancel();
            }
        });

        let result = orchestrator.run(&question, &self.table, &cancel).await;
        interrupt.abort();

        match result {
            Ok(report) => self.print_report(&report),
            Err(err) => {
                if self.json {
                    print_json(&failure_json(&err))?;
                }
                Err(err.into())
            }
        }
    }

    fn question_text(&self) -> AppResult<String> {
        let text = match (&self.question, &self.file) {
            (Some(question), _) => question.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => return Err(AppError::Config("No question provided".to_string())),
        };
        Ok(text.trim().to_string())
    }

    /// Agent settings from config with this command's flags applied.
    fn settings(&self, config: &AppConfig) -> AppResult<quarry_core::AgentSettings> {
        let mut settings = config.agent.clone();

        if let Some(max_rewrites) = self.max_rewrites {
            settings.max_rewrites = max_rewrites;
        }
        if let Some(top_k) = self.top_k {
            settings.retrieval_k = top_k;
        }
        if let Some(ref degraded) = self.degraded {
            settings.degraded_judgment_policy =
                DegradedJudgmentPolicy::parse(degraded).ok_or_else(|| {
                    AppError::Config(format!(
                        "Unknown degraded policy '{}'. Use insufficient or propagate",
                        degraded
                    ))
                })?;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            settings.call_timeout_ms = timeout_ms;
        }

        Ok(settings)
    }

    fn print_report(&self, report: &RunReport) -> AppResult<()> {
        if self.json {
            return print_json(&report_json(report));
        }

        println!("{}", report.answer.text);

        if !report.sources.is_empty() {
            println!();
            println!("Sources:");
            for source in &report.sources {
                println!("- {}", source);
            }
        }

        tracing::debug!(
            "Provenance: {}, generation: {}, retrievals: {}",
            report.answer.provenance.as_str(),
            report.answer.generation,
            report.retrievals
        );
        Ok(())
    }
}

fn report_json(report: &RunReport) -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "answer": report.answer.text,
        "provenance": report.answer.provenance,
        "generation": report.answer.generation,
        "retrievals": report.retrievals,
        "executionPath": report.execution_path,
        "queries": report.queries,
        "sources": report.sources,
        "verdicts": report.verdicts,
    })
}

fn failure_json(err: &RunError) -> serde_json::Value {
    serde_json::json!({
        "success": false,
        "error": err.to_string(),
        "kind": err.kind(),
        "stage": err.stage(),
        "collaborator": err.collaborator(),
    })
}

fn print_json(value: &serde_json::Value) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_agent::{Answer, Provenance, RunState};

    fn command() -> AskCommand {
        AskCommand {
            question: Some("  what is a crate?\n".to_string()),
            file: None,
            table: "docs".to_string(),
            max_rewrites: Some(0),
            top_k: Some(5),
            degraded: Some("insufficient".to_string()),
            timeout_ms: Some(1500),
            json: true,
        }
    }

    #[test]
    fn test_flags_override_config() {
        let settings = command().settings(&AppConfig::default()).unwrap();
        assert_eq!(settings.max_rewrites, 0);
        assert_eq!(settings.retrieval_k, 5);
        assert_eq!(
            settings.degraded_judgment_policy,
            DegradedJudgmentPolicy::TreatAsInsufficient
        );
        assert_eq!(settings.call_timeout_ms, 1500);
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let mut cmd = command();
        cmd.degraded = Some("shrug".to_string());
        assert!(cmd.settings(&AppConfig::default()).is_err());
    }

    #[test]
    fn test_question_is_trimmed() {
        assert_eq!(command().question_text().unwrap(), "what is a crate?");

        let mut cmd = command();
        cmd.question = None;
        assert!(cmd.question_text().is_err());
    }

    #[test]
    fn test_report_json_shape() {
        let report = RunReport {
            answer: Answer {
                text: "nothing found".to_string(),
                provenance: Provenance::Fallback,
                generation: 1,
            },
            verdicts: Vec::new(),
            execution_path: vec![RunState::Retrieving, RunState::Done],
            retrievals: 2,
            queries: vec!["q".to_string()],
            sources: Vec::new(),
        };

        let json = report_json(&report);
        assert_eq!(json["success"], true);
        assert_eq!(json["provenance"], "fallback");
        assert_eq!(json["executionPath"][1], "done");
        assert_eq!(json["retrievals"], 2);
    }

    #[test]
    fn test_failure_json_names_the_stage() {
        let err = RunError::RetrievalUnavailable {
            collaborator: "embedding-retriever".to_string(),
            cause: "Table 'docs' not found".to_string(),
        };

        let json = failure_json(&err);
        assert_eq!(json["success"], false);
        assert_eq!(json["stage"], "retrieval");
        assert_eq!(json["collaborator"], "embedding-retriever");
    }
}

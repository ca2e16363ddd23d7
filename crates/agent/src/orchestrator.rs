//! The retrieve → grade → rewrite/generate state machine.
//!
//! A run is a loop over [`RunState`]. Each state makes at most one
//! collaborator call, the result is folded into a [`StepOutcome`], and
//! [`next_state`] picks where to go. The generation counter only grows, and
//! grading at the ceiling always exits to generation, so a run retrieves at
//! most `max_rewrites + 1` times.

use crate::cancel::CancellationToken;
use crate::config::AgentConfig;
use crate::error::{RunError, RunResult, Stage};
use crate::generator::AnswerGenerator;
use crate::grader::RelevanceGrader;
use crate::retriever::Retriever;
use crate::rewriter::QueryRewriter;
use crate::types::{Answer, EvidenceSet, Provenance, Query, RelevanceVerdict, TableId};
use quarry_core::config::DegradedJudgmentPolicy;
use quarry_core::AppResult;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Retrieving,
    Grading,
    Rewriting,
    Generating,
    Done,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retrieving => "retrieving",
            Self::Grading => "grading",
            Self::Rewriting => "rewriting",
            Self::Generating => "generating",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the state just visited produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Retrieved,
    Judged { sufficient: bool },
    /// `changed` is false when the rewrite said nothing new
    Rewritten { changed: bool },
    /// The rewriter was unavailable; treated as "cannot improve"
    RewriteFailed,
    Generated,
}

/// Transition function of the run state machine.
///
/// `generation` is the current query's rewrite count.
pub fn next_state(outcome: StepOutcome, generation: u32, max_rewrites: u32) -> RunState {
    match outcome {
        StepOutcome::Retrieved => RunState::Grading,
        StepOutcome::Judged { sufficient } => {
            if sufficient || generation >= max_rewrites {
                RunState::Generating
            } else {
                RunState::Rewriting
            }
        }
        StepOutcome::Rewritten { changed: true } => RunState::Retrieving,
        StepOutcome::Rewritten { changed: false } | StepOutcome::RewriteFailed => {
            RunState::Generating
        }
        StepOutcome::Generated => RunState::Done,
    }
}

/// Everything a finished run has to say.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub answer: Answer,

    /// One verdict per grading step, in order
    pub verdicts: Vec<RelevanceVerdict>,

    /// States visited, ending in `done`
    pub execution_path: Vec<RunState>,

    /// Retriever calls made
    pub retrievals: u32,

    /// Question texts retrieved with, original first
    pub queries: Vec<String>,

    /// Sources of the evidence a grounded answer was built from
    pub sources: Vec<String>,
}

/// Drives runs against a fixed set of collaborators.
///
/// Holds no per-run state; one orchestrator can serve concurrent runs.
pub struct Orchestrator {
    config: AgentConfig,
    retriever: Arc<dyn Retriever>,
    grader: Arc<dyn RelevanceGrader>,
    rewriter: Arc<dyn QueryRewriter>,
    generator: Arc<dyn AnswerGenerator>,
}

/// Mutable context of a single run.
struct RunContext {
    query: Query,
    evidence: EvidenceSet,
    verdicts: Vec<RelevanceVerdict>,
    path: Vec<RunState>,
    queries: Vec<String>,
    retrievals: u32,

    /// Last verdict was insufficient with no rewrites left
    exhausted: bool,
}

impl RunContext {
    fn new(question: &str) -> Self {
        Self {
            query: Query::new(question),
            evidence: EvidenceSet::empty(0),
            verdicts: Vec::new(),
            path: Vec::new(),
            queries: vec![question.to_string()],
            retrievals: 0,
            exhausted: false,
        }
    }
}

impl Orchestrator {
    /// Build an orchestrator. Fails when `config` does not validate.
    pub fn new(
        config: AgentConfig,
        retriever: Arc<dyn Retriever>,
        grader: Arc<dyn RelevanceGrader>,
        rewriter: Arc<dyn QueryRewriter>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            retriever,
            grader,
            rewriter,
            generator,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Answer `question` from `table`. The run cannot be cancelled other
    /// than by dropping the future.
    pub async fn answer_question(&self, question: &str, table: &str) -> RunResult<RunReport> {
        self.run(question, table, &CancellationToken::new()).await
    }

    /// Answer `question` from `table`, abandoning the run when `cancel` fires.
    pub async fn run(
        &self,
        question: &str,
        table: &str,
        cancel: &CancellationToken,
    ) -> RunResult<RunReport> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RunError::InvalidRequest("question is empty".to_string()));
        }
        let table = TableId::parse(table).map_err(|e| RunError::InvalidRequest(e.to_string()))?;

        let span = tracing::info_span!("run", table = %table, query = %question);
        self.drive(question, &table, cancel).instrument(span).await
    }

    async fn drive(
        &self,
        question: &str,
        table: &TableId,
        cancel: &CancellationToken,
    ) -> RunResult<RunReport> {
        let max_rewrites = self.config.max_rewrites;
        let mut ctx = RunContext::new(question);
        let mut answer = None;
        let mut state = RunState::Retrieving;

        while state != RunState::Done {
            if cancel.is_cancelled() {
                tracing::debug!(state = %state, "Run cancelled between states");
                return Err(RunError::Cancelled);
            }

            ctx.path.push(state);
            tracing::debug!(state = %state, generation = ctx.query.generation(), "Entering state");

            let outcome = match state {
                RunState::Retrieving => {
                    ctx.evidence = self.retrieve(&ctx.query, table, cancel).await?;
                    ctx.retrievals += 1;
                    StepOutcome::Retrieved
                }
                RunState::Grading => {
                    let verdict = self.judge(&ctx.query, &ctx.evidence, cancel).await?;
                    let sufficient = verdict.sufficient;
                    ctx.exhausted = !sufficient && ctx.query.generation() >= max_rewrites;
                    ctx.verdicts.push(verdict);
                    StepOutcome::Judged { sufficient }
                }
                RunState::Rewriting => self.rewrite(&mut ctx, cancel).await?,
                RunState::Generating => {
                    answer = Some(self.produce_answer(&ctx, cancel).await?);
                    StepOutcome::Generated
                }
                RunState::Done => break,
            };

            state = next_state(outcome, ctx.query.generation(), max_rewrites);
        }
        ctx.path.push(RunState::Done);

        let answer = answer.ok_or_else(|| {
            RunError::unavailable(
                Stage::Generation,
                self.generator.name(),
                "run finished without an answer",
            )
        })?;

        tracing::info!(
            provenance = answer.provenance.as_str(),
            generation = answer.generation,
            retrievals = ctx.retrievals,
            "Run complete"
        );

        let sources = match answer.provenance {
            Provenance::Grounded => ctx.evidence.sources(),
            Provenance::Fallback => Vec::new(),
        };

        Ok(RunReport {
            answer,
            verdicts: ctx.verdicts,
            execution_path: ctx.path,
            retrievals: ctx.retrievals,
            queries: ctx.queries,
            sources,
        })
    }

    async fn retrieve(
        &self,
        query: &Query,
        table: &TableId,
        cancel: &CancellationToken,
    ) -> RunResult<EvidenceSet> {
        let retriever = self.retriever.as_ref();
        let evidence = self
            .call(
                Stage::Retrieval,
                retriever.name(),
                cancel,
                retriever.retrieve(query, table, self.config.retrieval_k),
            )
            .await?;

        tracing::debug!(passages = evidence.len(), "Evidence retrieved");
        Ok(evidence)
    }

    async fn judge(
        &self,
        query: &Query,
        evidence: &EvidenceSet,
        cancel: &CancellationToken,
    ) -> RunResult<RelevanceVerdict> {
        if evidence.is_empty() {
            tracing::debug!("No evidence, skipping judgment");
            return Ok(RelevanceVerdict::insufficient(evidence.generation())
                .with_rationale("no passages retrieved"));
        }

        let grader = self.grader.as_ref();
        let result = self
            .call(Stage::Judgment, grader.name(), cancel, grader.grade(query, evidence))
            .await;

        match result {
            Ok(verdict) => Ok(verdict),
            Err(RunError::Cancelled) => Err(RunError::Cancelled),
            Err(err)
                if self.config.degraded_judgment_policy
                    == DegradedJudgmentPolicy::TreatAsInsufficient =>
            {
                tracing::warn!(error = %err, "Judgment unavailable, treating evidence as insufficient");
                Ok(RelevanceVerdict::insufficient(evidence.generation())
                    .with_rationale(err.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    async fn rewrite(
        &self,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> RunResult<StepOutcome> {
        let rewriter = self.rewriter.as_ref();
        let result = self
            .call(
                Stage::Rewrite,
                rewriter.name(),
                cancel,
                rewriter.rewrite(&ctx.query, &ctx.evidence),
            )
            .await;

        let text = match result {
            Ok(text) => text,
            Err(RunError::Cancelled) => return Err(RunError::Cancelled),
            Err(err) => {
                tracing::warn!(error = %err, "Rewrite unavailable, answering from current evidence");
                return Ok(StepOutcome::RewriteFailed);
            }
        };

        let unchanged = text.trim().is_empty()
            || (self.config.skip_unchanged_rewrites && ctx.query.is_same_text(&text));

        if unchanged {
            tracing::debug!("Rewrite made no change, answering from current evidence");
            ctx.query = ctx.query.rewritten(ctx.query.text().to_string());
            return Ok(StepOutcome::Rewritten { changed: false });
        }

        ctx.query = ctx.query.rewritten(text.trim());
        ctx.queries.push(ctx.query.text().to_string());
        tracing::debug!(
            generation = ctx.query.generation(),
            query = ctx.query.text(),
            "Question rewritten"
        );
        Ok(StepOutcome::Rewritten { changed: true })
    }

    async fn produce_answer(
        &self,
        ctx: &RunContext,
        cancel: &CancellationToken,
    ) -> RunResult<Answer> {
        let generation = ctx.query.generation();

        if ctx.evidence.is_empty() || ctx.exhausted {
            tracing::debug!(
                empty = ctx.evidence.is_empty(),
                exhausted = ctx.exhausted,
                "Returning fallback answer"
            );
            return Ok(Answer {
                text: self.config.fallback_message.clone(),
                provenance: Provenance::Fallback,
                generation,
            });
        }

        let generator = self.generator.as_ref();
        let text = self
            .call(
                Stage::Generation,
                generator.name(),
                cancel,
                generator.generate(&ctx.query, &ctx.evidence),
            )
            .await?;

        Ok(Answer {
            text,
            provenance: Provenance::Grounded,
            generation,
        })
    }

    /// Await one collaborator call under the per-call timeout, racing it
    /// against cancellation.
    async fn call<T, F>(
        &self,
        stage: Stage,
        collaborator: &str,
        cancel: &CancellationToken,
        call: F,
    ) -> RunResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        let limit = self.config.call_timeout;

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!(stage = %stage, collaborator, "Call abandoned");
                Err(RunError::Cancelled)
            }
            result = tokio::time::timeout(limit, call) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => {
                    tracing::warn!(stage = %stage, collaborator, error = %err, "Collaborator failed");
                    Err(RunError::unavailable(stage, collaborator, err.to_string()))
                }
                Err(_) => {
                    let cause = format!("timed out after {} ms", limit.as_millis());
                    tracing::warn!(stage = %stage, collaborator, "{}", cause);
                    Err(RunError::unavailable(stage, collaborator, cause))
                }
            }
        }
    }
}

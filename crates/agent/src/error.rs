//! Run failure taxonomy.
//!
//! A run either returns an [`Answer`](crate::Answer), which may be a
//! fallback, or one of these errors. A fallback answer is a success.

use quarry_core::AppError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// The collaborator stage a failure originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Retrieval,
    Judgment,
    Rewrite,
    Generation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Retrieval => "retrieval",
            Self::Judgment => "judgment",
            Self::Rewrite => "rewrite",
            Self::Generation => "generation",
        })
    }
}

/// Why a run did not produce an answer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error("retrieval unavailable ({collaborator}): {cause}")]
    RetrievalUnavailable { collaborator: String, cause: String },

    #[error("relevance judgment unavailable ({collaborator}): {cause}")]
    JudgmentUnavailable { collaborator: String, cause: String },

    #[error("query rewrite unavailable ({collaborator}): {cause}")]
    RewriteUnavailable { collaborator: String, cause: String },

    #[error("answer generation unavailable ({collaborator}): {cause}")]
    GenerationUnavailable { collaborator: String, cause: String },

    /// The caller abandoned the run
    #[error("run cancelled")]
    Cancelled,

    /// The request was rejected before any collaborator was called
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RunError {
    /// Build the `*Unavailable` variant for `stage`.
    pub fn unavailable(
        stage: Stage,
        collaborator: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        let collaborator = collaborator.into();
        let cause = cause.into();
        match stage {
            Stage::Retrieval => Self::RetrievalUnavailable { collaborator, cause },
            Stage::Judgment => Self::JudgmentUnavailable { collaborator, cause },
            Stage::Rewrite => Self::RewriteUnavailable { collaborator, cause },
            Stage::Generation => Self::GenerationUnavailable { collaborator, cause },
        }
    }

    /// Stage of an `*Unavailable` error.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::RetrievalUnavailable { .. } => Some(Stage::Retrieval),
            Self::JudgmentUnavailable { .. } => Some(Stage::Judgment),
            Self::RewriteUnavailable { .. } => Some(Stage::Rewrite),
            Self::GenerationUnavailable { .. } => Some(Stage::Generation),
            Self::Cancelled | Self::InvalidRequest(_) => None,
        }
    }

    /// Name of the collaborator that failed, if any.
    pub fn collaborator(&self) -> Option<&str> {
        match self {
            Self::RetrievalUnavailable { collaborator, .. }
            | Self::JudgmentUnavailable { collaborator, .. }
            | Self::RewriteUnavailable { collaborator, .. }
            | Self::GenerationUnavailable { collaborator, .. } => Some(collaborator),
            Self::Cancelled | Self::InvalidRequest(_) => None,
        }
    }

    /// Short machine-readable kind, used in JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RetrievalUnavailable { .. } => "RetrievalUnavailable",
            Self::JudgmentUnavailable { .. } => "JudgmentUnavailable",
            Self::RewriteUnavailable { .. } => "RewriteUnavailable",
            Self::GenerationUnavailable { .. } => "GenerationUnavailable",
            Self::Cancelled => "Cancelled",
            Self::InvalidRequest(_) => "InvalidRequest",
        }
    }
}

impl From<RunError> for AppError {
    fn from(err: RunError) -> Self {
        AppError::Agent(err.to_string())
    }
}

/// Result alias for orchestrator operations.
pub type RunResult<T> = Result<T, RunError>;

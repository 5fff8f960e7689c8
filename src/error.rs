//! Error taxonomy for collaborator boundaries and the orchestrator.

use thiserror::Error;

/// Failure returned by an external collaborator (store, memory search,
/// compute platform, detection source).
///
/// The decision engine never propagates these: every call site converts
/// them into a neutral result and logs the [`FailureKind`].
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

/// Structured kind attached to degraded-outcome log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A detection source or store/memory call failed; treated as empty.
    CollectorFailure,
    /// A remediation call returned failure; recorded on the action.
    ActionExecutionFailure,
    /// A validation target no longer matches any live service.
    ValidationInconclusive,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::CollectorFailure => write!(f, "collector_failure"),
            FailureKind::ActionExecutionFailure => write!(f, "action_execution_failure"),
            FailureKind::ValidationInconclusive => write!(f, "validation_inconclusive"),
        }
    }
}

/// Errors surfaced by [`crate::pipeline::Pipeline::run`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("a pipeline run is already in flight")]
    AlreadyRunning,
}

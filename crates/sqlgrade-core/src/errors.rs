use crate::model::ExecutionStatus;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

/// Failures resolving a problem's declared tables. Always an infrastructure
/// failure: never attributed to the submitter's query.
#[derive(Debug, Clone, Error)]
pub enum DatasetError {
    #[error("dataset unavailable for problem '{problem_id}': {reason}")]
    Unavailable { problem_id: String, reason: String },
    #[error("invalid table declaration '{table}': {reason}")]
    Invalid { table: String, reason: String },
}

impl DatasetError {
    pub fn unavailable(problem_id: &str, reason: impl std::fmt::Display) -> Self {
        DatasetError::Unavailable {
            problem_id: problem_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Outcome of a sandboxed execution that did not produce a result set.
///
/// Everything except [`ExecutionError::Infrastructure`] and
/// [`ExecutionError::Cancelled`] is graded as a failing test case.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    #[error("query error: {0}")]
    Query(String),
    #[error("query exceeded the {limit_ms}ms time limit")]
    Timeout { limit_ms: u64 },
    #[error("resource limit exceeded: {0}")]
    ResourceExceeded(String),
    #[error("statement not allowed: {0}")]
    Forbidden(String),
    #[error("execution cancelled")]
    Cancelled,
    #[error("sandbox failure: {0}")]
    Infrastructure(String),
}

impl ExecutionError {
    /// The graded status for per-case failures; `None` for failures that
    /// abort the whole submission.
    pub fn status(&self) -> Option<ExecutionStatus> {
        match self {
            ExecutionError::Query(_) => Some(ExecutionStatus::QueryError),
            ExecutionError::Timeout { .. } => Some(ExecutionStatus::Timeout),
            ExecutionError::ResourceExceeded(_) => Some(ExecutionStatus::ResourceExceeded),
            ExecutionError::Forbidden(_) => Some(ExecutionStatus::ForbiddenStatement),
            ExecutionError::Cancelled | ExecutionError::Infrastructure(_) => None,
        }
    }

    /// Message surfaced to the submitter for public cases.
    pub fn user_message(&self) -> String {
        match self {
            ExecutionError::Query(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("illegal submission state transition {from:?} -> {to:?}")]
pub struct StateError {
    pub from: crate::engine::state::SubmissionState,
    pub to: crate::engine::state::SubmissionState,
}

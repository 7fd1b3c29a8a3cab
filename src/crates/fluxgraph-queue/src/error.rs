//! Error types for the job queue (spec §4.8).

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {0} was already claimed by another worker")]
    AlreadyClaimed(Uuid),

    #[error("job {0} deadline exceeded")]
    DeadlineExceeded(Uuid),

    #[error("job {0} was cancelled")]
    Cancelled(Uuid),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How a job failure should be treated by the worker's retry loop. Mirrors
/// `fluxgraph_core::FailureClass`; jobs additionally distinguish
/// `Aborted` (operator cancellation) from a plain permanent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFailureClass {
    Permanent,
    Retryable,
    Aborted,
    Unclassified,
}

impl From<JobFailureClass> for fluxgraph_core::FailureClass {
    fn from(value: JobFailureClass) -> Self {
        match value {
            JobFailureClass::Permanent => fluxgraph_core::FailureClass::Permanent,
            JobFailureClass::Retryable => fluxgraph_core::FailureClass::Retryable,
            JobFailureClass::Aborted => fluxgraph_core::FailureClass::Aborted,
            JobFailureClass::Unclassified => fluxgraph_core::FailureClass::Unclassified,
        }
    }
}

/// Classify a raw job error message into a [`JobFailureClass`]. Job handlers
/// that want precise control should return a [`JobOutcome::Failure`] with an
/// explicit class instead of relying on this heuristic.
pub fn classify(message: &str) -> JobFailureClass {
    let lower = message.to_ascii_lowercase();
    if lower.contains("permanent") || lower.contains("invalid") || lower.contains("malformed") {
        JobFailureClass::Permanent
    } else if lower.contains("cancel") || lower.contains("abort") {
        JobFailureClass::Aborted
    } else if lower.contains("timeout") || lower.contains("unavailable") || lower.contains("retry") {
        JobFailureClass::Retryable
    } else {
        JobFailureClass::Unclassified
    }
}

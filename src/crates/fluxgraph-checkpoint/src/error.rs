//! Error types for checkpoint store operations.

use thiserror::Error;

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while saving, loading, or listing checkpoints.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint exists with the given id.
    #[error("checkpoint not found: {0}")]
    NotFound(String),

    /// No thread exists with the given id (no checkpoints were ever saved for it).
    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    /// `parent_checkpoint_id` referenced a checkpoint that doesn't exist yet.
    #[error("parent checkpoint not found: {0}")]
    DanglingParent(String),

    /// Serialization of `graph_json` or task/dataflow state failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage backend failed for a reason opaque to this crate.
    #[error("storage error: {0}")]
    Storage(String),
}

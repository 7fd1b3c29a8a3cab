//! Error types for graph construction, scheduling, and task execution.
//!
//! Every variant here corresponds to one of the stable error kinds listed in
//! spec §7. The kind is what callers should match on — the `Display` message
//! is for humans, not for control flow.

use thiserror::Error;
use uuid::Uuid;

/// Result type used throughout `fluxgraph-core`.
pub type Result<T> = std::result::Result<T, GraphError>;

/// The closed set of error kinds a graph run can produce.
#[derive(Error, Debug)]
pub enum GraphError {
    /// A task's resolved input contains a reference cycle and cannot be
    /// deep-copied before execution.
    #[error("circular input data for task {task_id}")]
    CircularInput { task_id: Uuid },

    /// A required input port had no value after defaults, `set_input`, and
    /// incoming dataflows were all applied.
    #[error("missing required input '{port}' for task {task_id}")]
    MissingRequiredInput { task_id: Uuid, port: String },

    /// A task's predecessor failed, so this task can never become ready.
    #[error("task {task_id} is unreachable: upstream task {upstream_id} failed")]
    UpstreamMissing { task_id: Uuid, upstream_id: Uuid },

    /// The workflow builder could not auto-connect a required input.
    #[error("could not auto-connect required input '{port}' on task kind '{kind}'")]
    AutoConnectFailed { kind: String, port: String },

    /// `type` named in serialized `TaskItem` JSON has no registered factory.
    #[error("unknown task kind: '{0}'")]
    UnknownTaskKind(String),

    /// A conditional task's `default_branch` id does not name a declared branch.
    #[error("unknown default branch id: '{0}'")]
    UnknownBranch(String),

    /// A task declared both `append` and `replace` stream modes across its
    /// output ports; this is rejected at registration time, not at runtime.
    #[error("task kind '{kind}' mixes append and replace stream modes across output ports")]
    MixedStreamModes { kind: String },

    /// A per-task or per-job deadline was hit.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Cooperative abort was observed at a suspension point.
    #[error("aborted")]
    Aborted,

    /// Adding this dataflow would introduce a cycle.
    #[error("dataflow ({source_task}:{source_port} -> {target_task}:{target_port}) would create a cycle")]
    CyclicDataflow {
        source_task: Uuid,
        source_port: String,
        target_task: Uuid,
        target_port: String,
    },

    /// A task id was already present in the graph.
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(Uuid),

    /// A dataflow referenced a task id that isn't in the graph.
    #[error("dataflow references unknown task id: {0}")]
    UnknownTaskId(Uuid),

    /// Wraps the checkpoint store's own error type.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] fluxgraph_checkpoint::CheckpointError),

    /// Wraps a task's own execution error (the message produced by its
    /// `execute`/`execute_stream` implementation).
    #[error("task {task_id} failed: {message}")]
    TaskFailed { task_id: Uuid, message: String },

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML (de)serialization failure, used by workflow definitions loaded
    /// from YAML (see `langgraph-core::yaml` grounding in DESIGN.md).
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Catch-all for application-defined failures not covered above.
    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// True for error kinds that represent a cooperative cancellation rather
    /// than a genuine failure — the task kernel routes these to `ABORTING`
    /// instead of `FAILED` (spec §7 propagation policy).
    pub fn is_abort(&self) -> bool {
        matches!(self, GraphError::Aborted)
    }
}

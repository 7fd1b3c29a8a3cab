//! `CheckpointData` — a persistent snapshot of one graph run at a point in time.
//!
//! This is the wire/storage shape from spec §3: a checkpoint captures enough
//! of a `TaskGraph` run (serialized graph, per-task and per-dataflow state)
//! to rebuild and resume it later, chained to its parent by
//! `parent_checkpoint_id` so that a thread's checkpoints form a linked list
//! terminating at the first checkpoint taken for that thread.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Serialized status of a single task at checkpoint time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskState {
    pub task_id: Uuid,
    pub status: String,
    pub run_input_data: serde_json::Value,
    pub run_output_data: serde_json::Value,
    pub progress: u8,
    pub error: Option<String>,
}

/// Serialized status of a single dataflow edge at checkpoint time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataflowState {
    pub source_task_id: Uuid,
    pub source_task_port_id: String,
    pub target_task_id: Uuid,
    pub target_task_port_id: String,
    pub status: String,
}

/// Metadata attached to a checkpoint; distinguishes top-level runs from
/// checkpoints taken mid-iteration inside a `Map`/`Reduce`/`While` task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CheckpointMetadata {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub trigger_task_id: Option<Uuid>,
    pub iteration_parent_task_id: Option<Uuid>,
    pub iteration_index: Option<usize>,
}

impl CheckpointMetadata {
    pub fn now() -> Self {
        Self {
            created_at: chrono::Utc::now(),
            ..Default::default()
        }
    }
}

/// A single persisted snapshot of a graph run.
///
/// `graph_json` is the serialized `TaskGraph` (see `fluxgraph-core::json`) so
/// that a checkpoint store has no compile-time dependency on `fluxgraph-core`
/// and can be reused by any consumer that only needs storage semantics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointData {
    pub checkpoint_id: Uuid,
    pub thread_id: String,
    pub parent_checkpoint_id: Option<Uuid>,
    pub graph_json: serde_json::Value,
    pub task_states: Vec<TaskState>,
    pub dataflow_states: Vec<DataflowState>,
    pub metadata: CheckpointMetadata,
}

impl CheckpointData {
    /// Start a brand-new checkpoint chain for `thread_id`.
    pub fn root(thread_id: impl Into<String>, graph_json: serde_json::Value) -> Self {
        Self {
            checkpoint_id: Uuid::new_v4(),
            thread_id: thread_id.into(),
            parent_checkpoint_id: None,
            graph_json,
            task_states: Vec::new(),
            dataflow_states: Vec::new(),
            metadata: CheckpointMetadata::now(),
        }
    }

    /// Derive the next checkpoint in the same thread, chained to `self`.
    pub fn next(&self, graph_json: serde_json::Value) -> Self {
        Self {
            checkpoint_id: Uuid::new_v4(),
            thread_id: self.thread_id.clone(),
            parent_checkpoint_id: Some(self.checkpoint_id),
            graph_json,
            task_states: Vec::new(),
            dataflow_states: Vec::new(),
            metadata: CheckpointMetadata::now(),
        }
    }
}

//! `CheckpointStore` — the storage abstraction for §4.7.
//!
//! Downstream crates implement this trait against whatever backend they
//! like (SQL, an embedded KV store, a remote service); `fluxgraph-core`'s
//! scheduler only ever talks to this trait. The in-memory implementation in
//! [`crate::memory`] is the reference implementation and is what the test
//! suite exercises.

use async_trait::async_trait;
use uuid::Uuid;

use crate::checkpoint::CheckpointData;
use crate::error::Result;

/// Persistence interface for checkpoints.
///
/// All methods are idempotent with respect to `checkpoint_id`: saving the
/// same checkpoint twice overwrites rather than duplicating it, matching the
/// "idempotent upsert" contract in spec §4.7.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Idempotent upsert by `checkpoint_id`.
    async fn save_checkpoint(&self, data: CheckpointData) -> Result<()>;

    /// Fetch a single checkpoint by id.
    async fn get_checkpoint(&self, checkpoint_id: Uuid) -> Result<Option<CheckpointData>>;

    /// Fetch the most recently created checkpoint for a thread.
    async fn get_latest_checkpoint(&self, thread_id: &str) -> Result<Option<CheckpointData>>;

    /// Fetch every checkpoint for a thread, ordered oldest to newest.
    async fn get_checkpoint_history(&self, thread_id: &str) -> Result<Vec<CheckpointData>>;

    /// Fetch the checkpoints taken for a specific iteration of a `Map`,
    /// `Reduce`, or `While` task within a thread.
    async fn get_checkpoints_for_iteration(
        &self,
        thread_id: &str,
        iteration_parent_task_id: Uuid,
    ) -> Result<Vec<CheckpointData>>;

    /// Delete every checkpoint belonging to a thread.
    async fn delete_checkpoints(&self, thread_id: &str) -> Result<()>;
}

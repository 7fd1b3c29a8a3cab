//! In-memory [`CheckpointStore`] — the reference implementation.
//!
//! Stores every checkpoint for every thread in a `parking_lot::RwLock`-guarded
//! map, ordered by insertion. Suitable for tests, single-process runs, and as
//! a template for a real backend: everything here is expressible against any
//! store that supports "append row keyed by (thread_id, checkpoint_id)" plus
//! a secondary index on thread_id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::checkpoint::CheckpointData;
use crate::error::Result;
use crate::traits::CheckpointStore;

#[derive(Default)]
struct Inner {
    /// Insertion-ordered per-thread checkpoint log.
    by_thread: HashMap<String, Vec<CheckpointData>>,
    /// Secondary index for direct checkpoint_id lookup.
    by_id: HashMap<Uuid, (String, usize)>,
}

/// Thread-safe, in-memory [`CheckpointStore`].
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/dev helper: drop all stored checkpoints.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_thread.clear();
        inner.by_id.clear();
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save_checkpoint(&self, data: CheckpointData) -> Result<()> {
        let mut inner = self.inner.write();
        let thread_id = data.thread_id.clone();
        let checkpoint_id = data.checkpoint_id;

        if let Some(&(_, idx)) = inner.by_id.get(&checkpoint_id) {
            // Upsert: overwrite in place, thread_id cannot change.
            let log = inner.by_thread.get_mut(&thread_id).expect("index consistent");
            log[idx] = data;
        } else {
            let log = inner.by_thread.entry(thread_id.clone()).or_default();
            let idx = log.len();
            log.push(data);
            inner.by_id.insert(checkpoint_id, (thread_id, idx));
        }
        Ok(())
    }

    async fn get_checkpoint(&self, checkpoint_id: Uuid) -> Result<Option<CheckpointData>> {
        let inner = self.inner.read();
        Ok(inner
            .by_id
            .get(&checkpoint_id)
            .map(|(thread_id, idx)| inner.by_thread[thread_id][*idx].clone()))
    }

    async fn get_latest_checkpoint(&self, thread_id: &str) -> Result<Option<CheckpointData>> {
        let inner = self.inner.read();
        Ok(inner.by_thread.get(thread_id).and_then(|log| log.last().cloned()))
    }

    async fn get_checkpoint_history(&self, thread_id: &str) -> Result<Vec<CheckpointData>> {
        let inner = self.inner.read();
        Ok(inner.by_thread.get(thread_id).cloned().unwrap_or_default())
    }

    async fn get_checkpoints_for_iteration(
        &self,
        thread_id: &str,
        iteration_parent_task_id: Uuid,
    ) -> Result<Vec<CheckpointData>> {
        let inner = self.inner.read();
        Ok(inner
            .by_thread
            .get(thread_id)
            .map(|log| {
                log.iter()
                    .filter(|c| c.metadata.iteration_parent_task_id == Some(iteration_parent_task_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_checkpoints(&self, thread_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(log) = inner.by_thread.remove(thread_id) {
            for c in log {
                inner.by_id.remove(&c.checkpoint_id);
            }
        }
        Ok(())
    }
}

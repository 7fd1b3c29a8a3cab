//! A future-like handle for awaiting a single job's terminal outcome.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use fluxgraph_core::{EventBus, ListenerId};

use crate::client::QueueEvent;
use crate::error::Result;
use crate::job::{Job, JobStatus};
use crate::storage::QueueStorage;

pub struct JobHandle {
    storage: Arc<dyn QueueStorage>,
    events: EventBus<QueueEvent>,
    job_id: Uuid,
    poll_interval: Duration,
}

impl JobHandle {
    pub(crate) fn new(
        storage: Arc<dyn QueueStorage>,
        events: EventBus<QueueEvent>,
        job_id: Uuid,
        poll_interval: Duration,
    ) -> Self {
        Self { storage, events, job_id, poll_interval }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Wait until the job reaches a terminal status. Prefers the event bus
    /// (resolves immediately once the worker emits `job_complete`/
    /// `job_error`/`job_aborting`) and falls back to polling storage at
    /// `poll_interval` in case this handle was constructed after the
    /// terminal event already fired.
    pub async fn wait(self) -> Result<Job> {
        loop {
            let job = self.storage.get(self.job_id).await?;
            if job.is_terminal() {
                return Ok(job);
            }

            tokio::select! {
                _ = self.events.wait_on("job_complete") => {}
                _ = self.events.wait_on("job_error") => {}
                _ = self.events.wait_on("job_aborting") => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Register `cb` to receive every `job_progress` event for this job.
    /// Returns an unsubscribe handle; the subscription is not job-filtered
    /// at the bus level, so callers should check `job_id` in `cb`.
    pub fn on_progress(&self, cb: impl Fn(&QueueEvent) + Send + Sync + 'static) -> ListenerId {
        self.events.on("job_progress", cb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::QueueClient;
    use crate::storage::InMemoryQueueStorage;
    use serde_json::json;

    #[tokio::test]
    async fn wait_resolves_once_storage_marks_terminal() {
        let storage = InMemoryQueueStorage::new();
        let client = QueueClient::new(storage.clone());
        let job = client.enqueue(Job::new("x", json!({}))).await.unwrap();
        storage.complete(job.id, json!({"ok": true})).await.unwrap();

        let handle = JobHandle::new(storage, client.events.clone(), job.id, Duration::from_millis(10));
        let done = handle.wait().await.unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
    }
}

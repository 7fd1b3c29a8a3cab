//! Producer-facing API: enqueue jobs, await their outcome, cancel them
//! (spec §4.8).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use fluxgraph_core::{EventBus, EventKind};

use crate::error::Result;
use crate::handle::JobHandle;
use crate::job::Job;
use crate::storage::QueueStorage;

/// Cross-process-shaped lifecycle events, named to match the job queue
/// client's closed event-name set. In this in-process bundled implementation
/// delivery is at-least-once only within one process; a durable storage
/// backend wired in by a host application is what makes delivery durable
/// across processes (see `DESIGN.md`).
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A worker claimed the job and began running its handler.
    JobStart { job_id: Uuid, worker_id: String },
    /// A worker published a progress update for the job.
    JobProgress { job_id: Uuid, pct: u8, message: Option<String>, details: Option<Value> },
    JobComplete { job_id: Uuid, result: Value },
    /// A handler failure, retried or terminal — see `terminal`.
    JobError { job_id: Uuid, message: String, terminal: bool },
    /// The failure was classified retryable and the job was requeued.
    JobRetry { job_id: Uuid, message: String, next_attempt_at: DateTime<Utc> },
    /// The job's kind was paused via `QueueServer::pause_kind` and will not
    /// be claimed until resumed.
    JobDisabled { job_id: Uuid },
    /// `cancel`/`abort_job_run` was called; the job is transitioning to
    /// `Aborted` but a handler run in flight may still be unwinding.
    JobAborting { job_id: Uuid },
}

impl EventKind for QueueEvent {
    fn name(&self) -> &'static str {
        match self {
            QueueEvent::JobStart { .. } => "job_start",
            QueueEvent::JobProgress { .. } => "job_progress",
            QueueEvent::JobComplete { .. } => "job_complete",
            QueueEvent::JobError { .. } => "job_error",
            QueueEvent::JobRetry { .. } => "job_retry",
            QueueEvent::JobDisabled { .. } => "job_disabled",
            QueueEvent::JobAborting { .. } => "job_aborting",
        }
    }
}

#[derive(Clone)]
pub struct QueueClient {
    storage: Arc<dyn QueueStorage>,
    pub events: EventBus<QueueEvent>,
}

impl QueueClient {
    pub fn new(storage: Arc<dyn QueueStorage>) -> Self {
        Self { storage, events: EventBus::new() }
    }

    pub async fn enqueue(&self, job: Job) -> Result<Job> {
        self.storage.enqueue(job).await
    }

    /// Enqueue every job in `jobs` under a freshly generated shared
    /// `job_run_id`, so `abort_job_run` can later cancel the whole group.
    pub async fn submit_batch(&self, jobs: Vec<Job>) -> Result<(Uuid, Vec<Job>)> {
        let run_id = Uuid::new_v4();
        let mut stored = Vec::with_capacity(jobs.len());
        for job in jobs {
            stored.push(self.storage.enqueue(job.with_job_run_id(run_id)).await?);
        }
        Ok((run_id, stored))
    }

    /// Cancel every job sharing `job_run_id`.
    pub async fn abort_job_run(&self, job_run_id: Uuid) -> Result<()> {
        for job in self.storage.get_by_run_id(job_run_id).await? {
            if !job.is_terminal() {
                self.cancel(job.id).await?;
            }
        }
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Job> {
        self.storage.get(id).await
    }

    pub async fn cancel(&self, id: Uuid) -> Result<()> {
        self.events.emit(QueueEvent::JobAborting { job_id: id });
        self.storage.cancel(id).await
    }

    /// Enqueue and return a future that resolves once the job reaches a
    /// terminal state, polling `storage` at `poll_interval` (event-driven
    /// completion notification is also available via `events.wait_on`, used
    /// internally once the worker emits a terminal event for this job).
    pub async fn enqueue_and_wait(&self, job: Job, poll_interval: Duration) -> Result<JobHandle> {
        let stored = self.enqueue(job).await?;
        Ok(JobHandle::new(self.storage.clone(), self.events.clone(), stored.id, poll_interval))
    }

    pub async fn run_after(&self, job: Job, delay: Duration) -> Result<Job> {
        self.enqueue(job.with_run_after(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default()))
            .await
    }

    pub async fn scheduled_at(&self, job: Job, at: DateTime<Utc>) -> Result<Job> {
        self.enqueue(job.with_run_after(at)).await
    }
}

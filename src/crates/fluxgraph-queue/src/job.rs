//! Job records and lifecycle (spec §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::JobFailureClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Claimed,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

/// An enqueued unit of work. `idempotency_key`, if set, deduplicates enqueue
/// calls so at-least-once producers don't create duplicate jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: String,
    /// Logical queue this job was submitted to. Workers and `QueueServer`
    /// scaling are addressed by queue name, not job kind, so one queue can
    /// multiplex several handler kinds.
    pub queue_name: String,
    pub payload: Value,
    pub status: JobStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub priority: i32,
    pub idempotency_key: Option<String>,
    pub run_after: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result: Option<Value>,
    /// `[0,100]`, clamped, non-decreasing like a task's progress.
    pub progress: u8,
    pub progress_message: Option<String>,
    pub progress_details: Option<Value>,
    /// Groups jobs submitted together via `submit_batch`; `abort_job_run`
    /// cancels every job sharing a `job_run_id`.
    pub job_run_id: Option<Uuid>,
    /// Canonical hash of `(kind, payload)`, set by the client at enqueue time
    /// so `QueueStorage::output_for_input` can serve a cached result without
    /// running the handler again.
    pub fingerprint: Option<String>,
}

impl Job {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        let now = Utc::now();
        let kind = kind.into();
        Self {
            id: Uuid::new_v4(),
            queue_name: kind.clone(),
            kind,
            payload,
            status: JobStatus::Queued,
            attempt: 0,
            max_attempts: 3,
            priority: 0,
            idempotency_key: None,
            run_after: now,
            deadline: None,
            created_at: now,
            claimed_by: None,
            claimed_at: None,
            last_error: None,
            result: None,
            progress: 0,
            progress_message: None,
            progress_details: None,
            job_run_id: None,
            fingerprint: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_run_after(mut self, run_after: DateTime<Utc>) -> Self {
        self.run_after = run_after;
        self
    }

    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    pub fn with_job_run_id(mut self, job_run_id: Uuid) -> Self {
        self.job_run_id = Some(job_run_id);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Apply a progress update the way a task's `updateProgress` does:
    /// clamped to `[0,100]` and never moving backward.
    pub fn apply_progress(&mut self, pct: u8, message: Option<String>, details: Option<Value>) {
        self.progress = pct.min(100).max(self.progress);
        if message.is_some() {
            self.progress_message = message;
        }
        if details.is_some() {
            self.progress_details = details;
        }
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Aborted)
    }
}

/// What a job handler reports back to the worker loop.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Success(Value),
    Failure { message: String, class: JobFailureClass },
}

//! Pluggable job storage (spec §4.8 `IQueueStorage`).
//!
//! [`InMemoryQueueStorage`] is the bundled default, grounded on the same
//! `Arc<RwLock<HashMap<..>>>` shape as `fluxgraph_checkpoint::memory`. A host
//! application swaps in a durable implementation (e.g. Postgres-backed, as
//! in the everruns-style `WorkflowEventStore`) by implementing
//! [`QueueStorage`] against its own database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::job::{Job, JobStatus};

#[async_trait]
pub trait QueueStorage: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<Job>;
    async fn get(&self, id: Uuid) -> Result<Job>;
    /// Atomically claim the highest-priority, earliest-`run_after` queued
    /// job that is due by `now` and not claimed by anyone else.
    async fn claim_next(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Job>>;
    async fn complete(&self, id: Uuid, result: serde_json::Value) -> Result<()>;
    async fn fail(&self, id: Uuid, message: String, terminal: bool) -> Result<()>;
    async fn requeue(&self, id: Uuid, run_after: DateTime<Utc>) -> Result<()>;
    async fn cancel(&self, id: Uuid) -> Result<()>;
    async fn find_by_idempotency_key(&self, kind: &str, key: &str) -> Result<Option<Job>>;

    /// Merge a progress update into the job the way [`Job::apply_progress`]
    /// would, for a worker mid-`execute` to publish partial status.
    async fn save_progress(&self, id: Uuid, pct: u8, message: Option<String>, details: Option<Value>) -> Result<()>;
    /// Up to `n` jobs in `status` (or any status, if `None`), for admin
    /// inspection without claiming them.
    async fn peek(&self, status: Option<JobStatus>, n: usize) -> Result<Vec<Job>>;
    /// Count of jobs in `status` (or all jobs, if `None`).
    async fn size(&self, status: Option<JobStatus>) -> Result<usize>;
    /// Every job submitted under `submit_batch`'s shared `job_run_id`.
    async fn get_by_run_id(&self, job_run_id: Uuid) -> Result<Vec<Job>>;
    /// Cached result of a previously-succeeded job sharing `fingerprint`.
    async fn output_for_input(&self, fingerprint: &str) -> Result<Option<Value>>;
    async fn delete(&self, id: Uuid) -> Result<()>;
    /// Permanently remove jobs in `status` whose `created_at` is older than
    /// `age`, for periodic cleanup of terminal jobs.
    async fn delete_jobs_by_status_and_age(&self, status: JobStatus, age: ChronoDuration) -> Result<usize>;
}

#[derive(Default)]
pub struct InMemoryQueueStorage {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryQueueStorage {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }
}

#[async_trait]
impl QueueStorage for InMemoryQueueStorage {
    async fn enqueue(&self, job: Job) -> Result<Job> {
        if let Some(key) = &job.idempotency_key {
            if let Some(existing) = self.find_by_idempotency_key(&job.kind, key).await? {
                return Ok(existing);
            }
        }
        let mut jobs = self.jobs.write();
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Job> {
        self.jobs.read().get(&id).cloned().ok_or(QueueError::NotFound(id))
    }

    async fn claim_next(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut jobs = self.jobs.write();
        let candidate = jobs
            .values_mut()
            .filter(|j| j.status == JobStatus::Queued && j.run_after <= now)
            .min_by(|a, b| b.priority.cmp(&a.priority).then(a.run_after.cmp(&b.run_after)))
            .map(|j| j.id);

        let Some(id) = candidate else {
            return Ok(None);
        };
        let job = jobs.get_mut(&id).unwrap();
        job.status = JobStatus::Claimed;
        job.claimed_by = Some(worker_id.to_string());
        job.claimed_at = Some(now);
        job.attempt += 1;
        Ok(Some(job.clone()))
    }

    async fn complete(&self, id: Uuid, result: serde_json::Value) -> Result<()> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.status = JobStatus::Succeeded;
        job.result = Some(result);
        Ok(())
    }

    async fn fail(&self, id: Uuid, message: String, terminal: bool) -> Result<()> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.last_error = Some(message);
        job.status = if terminal { JobStatus::Failed } else { JobStatus::Queued };
        Ok(())
    }

    async fn requeue(&self, id: Uuid, run_after: DateTime<Utc>) -> Result<()> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.status = JobStatus::Queued;
        job.run_after = run_after;
        job.claimed_by = None;
        job.claimed_at = None;
        Ok(())
    }

    async fn cancel(&self, id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.status = JobStatus::Aborted;
        Ok(())
    }

    async fn find_by_idempotency_key(&self, kind: &str, key: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .read()
            .values()
            .find(|j| j.kind == kind && j.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn save_progress(&self, id: Uuid, pct: u8, message: Option<String>, details: Option<Value>) -> Result<()> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.apply_progress(pct, message, details);
        Ok(())
    }

    async fn peek(&self, status: Option<JobStatus>, n: usize) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .read()
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .take(n)
            .cloned()
            .collect())
    }

    async fn size(&self, status: Option<JobStatus>) -> Result<usize> {
        Ok(self.jobs.read().values().filter(|j| status.map_or(true, |s| j.status == s)).count())
    }

    async fn get_by_run_id(&self, job_run_id: Uuid) -> Result<Vec<Job>> {
        Ok(self.jobs.read().values().filter(|j| j.job_run_id == Some(job_run_id)).cloned().collect())
    }

    async fn output_for_input(&self, fingerprint: &str) -> Result<Option<Value>> {
        Ok(self
            .jobs
            .read()
            .values()
            .find(|j| j.status == JobStatus::Succeeded && j.fingerprint.as_deref() == Some(fingerprint))
            .and_then(|j| j.result.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.jobs.write().remove(&id).ok_or(QueueError::NotFound(id))?;
        Ok(())
    }

    async fn delete_jobs_by_status_and_age(&self, status: JobStatus, age: ChronoDuration) -> Result<usize> {
        let cutoff = Utc::now() - age;
        let mut jobs = self.jobs.write();
        let stale: Vec<Uuid> =
            jobs.values().filter(|j| j.status == status && j.created_at <= cutoff).map(|j| j.id).collect();
        for id in &stale {
            jobs.remove(id);
        }
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn enqueue_is_idempotent_by_key() {
        let storage = InMemoryQueueStorage::new();
        let job_a = Job::new("send", json!({})).with_idempotency_key("abc");
        let job_b = Job::new("send", json!({})).with_idempotency_key("abc");
        let first = storage.enqueue(job_a).await.unwrap();
        let second = storage.enqueue(job_b).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn claim_next_respects_priority() {
        let storage = InMemoryQueueStorage::new();
        let low = storage.enqueue(Job::new("x", json!({})).with_priority(0)).await.unwrap();
        let high = storage.enqueue(Job::new("x", json!({})).with_priority(5)).await.unwrap();
        let claimed = storage.claim_next("worker-1", Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, high.id);
        assert_ne!(claimed.id, low.id);
    }

    #[tokio::test]
    async fn claim_next_skips_not_yet_due_jobs() {
        let storage = InMemoryQueueStorage::new();
        storage
            .enqueue(Job::new("x", json!({})).with_run_after(Utc::now() + chrono::Duration::hours(1)))
            .await
            .unwrap();
        assert!(storage.claim_next("worker-1", Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_progress_updates_the_stored_job() {
        let storage = InMemoryQueueStorage::new();
        let job = storage.enqueue(Job::new("x", json!({}))).await.unwrap();
        storage.save_progress(job.id, 55, Some("halfway".into()), None).await.unwrap();
        let fetched = storage.get(job.id).await.unwrap();
        assert_eq!(fetched.progress, 55);
        assert_eq!(fetched.progress_message.as_deref(), Some("halfway"));
    }

    #[tokio::test]
    async fn peek_and_size_filter_by_status() {
        let storage = InMemoryQueueStorage::new();
        let a = storage.enqueue(Job::new("x", json!({}))).await.unwrap();
        storage.enqueue(Job::new("x", json!({}))).await.unwrap();
        storage.complete(a.id, json!(null)).await.unwrap();

        assert_eq!(storage.size(None).await.unwrap(), 2);
        assert_eq!(storage.size(Some(JobStatus::Queued)).await.unwrap(), 1);
        assert_eq!(storage.peek(Some(JobStatus::Succeeded), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_by_run_id_groups_batch_submissions() {
        let storage = InMemoryQueueStorage::new();
        let run_id = Uuid::new_v4();
        storage.enqueue(Job::new("x", json!({})).with_job_run_id(run_id)).await.unwrap();
        storage.enqueue(Job::new("x", json!({})).with_job_run_id(run_id)).await.unwrap();
        storage.enqueue(Job::new("x", json!({}))).await.unwrap();
        assert_eq!(storage.get_by_run_id(run_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn output_for_input_serves_cached_result_by_fingerprint() {
        let storage = InMemoryQueueStorage::new();
        let job = storage.enqueue(Job::new("x", json!({})).with_fingerprint("fp-1")).await.unwrap();
        assert!(storage.output_for_input("fp-1").await.unwrap().is_none());
        storage.complete(job.id, json!({"ok": true})).await.unwrap();
        assert_eq!(storage.output_for_input("fp-1").await.unwrap(), Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn delete_jobs_by_status_and_age_removes_only_stale_terminal_jobs() {
        let storage = InMemoryQueueStorage::new();
        let old = storage.enqueue(Job::new("x", json!({}))).await.unwrap();
        let fresh = storage.enqueue(Job::new("x", json!({}))).await.unwrap();
        storage.complete(old.id, json!(null)).await.unwrap();
        storage.complete(fresh.id, json!(null)).await.unwrap();
        {
            let mut jobs = storage.jobs.write();
            jobs.get_mut(&old.id).unwrap().created_at = Utc::now() - chrono::Duration::days(2);
        }
        let removed = storage
            .delete_jobs_by_status_and_age(JobStatus::Succeeded, chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(storage.get(old.id).await.is_err());
        assert!(storage.get(fresh.id).await.is_ok());
    }
}

//! Administrative view over the queue: counts, cancellation, pause/resume by
//! kind, worker pool scaling, and periodic cleanup (spec §4.8).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use fluxgraph_core::{EventBus, EventKind};

use crate::error::Result;
use crate::job::{Job, JobStatus};
use crate::storage::QueueStorage;
use crate::worker::Worker;

/// Server-lifecycle events, distinct from the per-job [`crate::client::QueueEvent`]
/// set: these describe the worker pool itself coming up or down.
#[derive(Debug, Clone, Copy)]
pub enum ServerEvent {
    Start,
    Stop,
}

impl EventKind for ServerEvent {
    fn name(&self) -> &'static str {
        match self {
            ServerEvent::Start => "server_start",
            ServerEvent::Stop => "server_stop",
        }
    }
}

/// How often and how aggressively `QueueServer::start` sweeps terminal jobs.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub interval: Duration,
    pub statuses: Vec<JobStatus>,
    pub max_age: ChronoDuration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            statuses: vec![JobStatus::Succeeded, JobStatus::Failed, JobStatus::Aborted],
            max_age: ChronoDuration::days(7),
        }
    }
}

/// Wraps [`QueueStorage`] with operator-facing controls that don't belong on
/// the producer-facing [`crate::client::QueueClient`]: pausing a job kind
/// (claims for that kind are refused until resumed), bulk introspection, and
/// owning the worker pool's lifecycle (`scale_workers`, `start`/`stop`).
pub struct QueueServer {
    storage: Arc<dyn QueueStorage>,
    paused_kinds: RwLock<HashSet<String>>,
    worker_factory: Arc<dyn Fn() -> Worker + Send + Sync>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    cleanup: Mutex<Option<tokio::task::JoinHandle<()>>>,
    cleanup_config: CleanupConfig,
    pub events: EventBus<ServerEvent>,
}

impl QueueServer {
    /// `worker_factory` builds one fully-configured [`Worker`] (handlers and
    /// retry policies already registered) per call; `scale_workers` invokes
    /// it once per worker loop it needs to spin up.
    pub fn new(storage: Arc<dyn QueueStorage>, worker_factory: Arc<dyn Fn() -> Worker + Send + Sync>) -> Self {
        Self {
            storage,
            paused_kinds: RwLock::new(HashSet::new()),
            worker_factory,
            workers: Mutex::new(Vec::new()),
            cleanup: Mutex::new(None),
            cleanup_config: CleanupConfig::default(),
            events: EventBus::new(),
        }
    }

    pub fn with_cleanup_config(mut self, config: CleanupConfig) -> Self {
        self.cleanup_config = config;
        self
    }

    pub fn pause_kind(&self, kind: impl Into<String>) {
        self.paused_kinds.write().insert(kind.into());
    }

    pub fn resume_kind(&self, kind: &str) {
        self.paused_kinds.write().remove(kind);
    }

    pub fn is_paused(&self, kind: &str) -> bool {
        self.paused_kinds.read().contains(kind)
    }

    pub async fn job(&self, id: Uuid) -> Result<Job> {
        self.storage.get(id).await
    }

    pub async fn cancel(&self, id: Uuid) -> Result<()> {
        self.storage.cancel(id).await
    }

    pub fn storage(&self) -> Arc<dyn QueueStorage> {
        self.storage.clone()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Spin up or tear down worker loops to reach exactly `n` running at
    /// once. Torn-down loops are aborted immediately, mid-job or not — a
    /// host that needs graceful drain should scale down between polls.
    pub fn scale_workers(&self, n: usize) {
        let mut workers = self.workers.lock();
        while workers.len() < n {
            let worker = (self.worker_factory)();
            workers.push(tokio::spawn(async move {
                let _ = worker.run_forever().await;
            }));
        }
        while workers.len() > n {
            if let Some(handle) = workers.pop() {
                handle.abort();
            }
        }
    }

    /// Bring the server fully up: scale the worker pool to `worker_count`
    /// and start the periodic cleanup sweep. Emits `server_start`.
    pub fn start(&self, worker_count: usize) {
        self.scale_workers(worker_count);
        let storage = self.storage.clone();
        let config = self.cleanup_config.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(config.interval).await;
                for status in &config.statuses {
                    let _ = storage.delete_jobs_by_status_and_age(*status, config.max_age).await;
                }
            }
        });
        *self.cleanup.lock() = Some(handle);
        self.events.emit(ServerEvent::Start);
    }

    /// Tear the server down: abort every worker loop and the cleanup sweep.
    /// Emits `server_stop`.
    pub fn stop(&self) {
        self.scale_workers(0);
        if let Some(handle) = self.cleanup.lock().take() {
            handle.abort();
        }
        self.events.emit(ServerEvent::Stop);
    }
}

/// Summary counts by status, computed over a snapshot of jobs a storage
/// backend chooses to expose (the in-memory backend keeps everything in
/// one map, so this just filters it).
pub fn status_counts(jobs: &[Job]) -> std::collections::HashMap<JobStatus, usize> {
    let mut counts = std::collections::HashMap::new();
    for job in jobs {
        *counts.entry(job.status).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryQueueStorage;
    use crate::worker::WorkerConfig;
    use serde_json::json;

    fn no_op_factory(storage: Arc<dyn QueueStorage>) -> Arc<dyn Fn() -> Worker + Send + Sync> {
        Arc::new(move || Worker::new(storage.clone(), WorkerConfig::default()))
    }

    #[tokio::test]
    async fn pause_and_resume_kind() {
        let storage = InMemoryQueueStorage::new();
        let server = QueueServer::new(storage.clone(), no_op_factory(storage));
        assert!(!server.is_paused("send_email"));
        server.pause_kind("send_email");
        assert!(server.is_paused("send_email"));
        server.resume_kind("send_email");
        assert!(!server.is_paused("send_email"));
    }

    #[tokio::test]
    async fn cancel_delegates_to_storage() {
        let storage = InMemoryQueueStorage::new();
        let server = QueueServer::new(storage.clone(), no_op_factory(storage.clone()));
        let job = storage.enqueue(Job::new("x", json!({}))).await.unwrap();
        server.cancel(job.id).await.unwrap();
        assert_eq!(server.job(job.id).await.unwrap().status, JobStatus::Aborted);
    }

    #[test]
    fn status_counts_tallies_by_status() {
        let jobs = vec![Job::new("a", json!({})), Job::new("b", json!({}))];
        let counts = status_counts(&jobs);
        assert_eq!(counts[&JobStatus::Queued], 2);
    }

    #[tokio::test]
    async fn scale_workers_spawns_and_tears_down_loops() {
        let storage = InMemoryQueueStorage::new();
        let server = QueueServer::new(storage.clone(), no_op_factory(storage));
        server.scale_workers(3);
        assert_eq!(server.worker_count(), 3);
        server.scale_workers(1);
        assert_eq!(server.worker_count(), 1);
        server.scale_workers(0);
        assert_eq!(server.worker_count(), 0);
    }

    #[tokio::test]
    async fn start_and_stop_emit_lifecycle_events() {
        let storage = InMemoryQueueStorage::new();
        let server = QueueServer::new(storage.clone(), no_op_factory(storage));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        server.events.on("server_start", move |_: &ServerEvent| seen2.lock().push("start"));
        let seen3 = seen.clone();
        server.events.on("server_stop", move |_: &ServerEvent| seen3.lock().push("stop"));

        server.start(2);
        assert_eq!(server.worker_count(), 2);
        server.stop();
        assert_eq!(server.worker_count(), 0);
        assert_eq!(*seen.lock(), vec!["start", "stop"]);
    }
}

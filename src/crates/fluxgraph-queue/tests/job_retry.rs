//! Literal job-retry scenario from the job-queue specification's testable
//! properties: a job that fails twice with a retryable error then succeeds,
//! with `maxRetries: 3`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fluxgraph_core::RetryPolicy;
use fluxgraph_queue::{
    InMemoryQueueStorage, Job, JobFailureClass, JobHandler, JobOutcome, JobStatus, QueueStorage,
    Worker, WorkerConfig,
};
use serde_json::{json, Value};

struct RetryTwiceThenSucceed {
    attempts: AtomicU32,
}

#[async_trait]
impl JobHandler for RetryTwiceThenSucceed {
    async fn handle(&self, _payload: Value) -> JobOutcome {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= 2 {
            JobOutcome::Failure { message: "transient: retry please".into(), class: JobFailureClass::Retryable }
        } else {
            JobOutcome::Success(json!({"ok": true}))
        }
    }
}

#[tokio::test]
async fn job_retries_twice_then_completes_with_three_attempts() {
    let storage = InMemoryQueueStorage::new();
    let mut worker = Worker::new(storage.clone(), WorkerConfig::default());
    worker.register("flaky", Arc::new(RetryTwiceThenSucceed { attempts: AtomicU32::new(0) }));
    worker.with_retry_policy(
        "flaky",
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_ratio: 0.0,
        },
    );

    let job = storage.enqueue(Job::new("flaky", json!({})).with_max_attempts(3)).await.unwrap();

    assert!(worker.tick().await.unwrap());
    assert_eq!(storage.get(job.id).await.unwrap().status, JobStatus::Queued);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(worker.tick().await.unwrap());
    assert_eq!(storage.get(job.id).await.unwrap().status, JobStatus::Queued);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(worker.tick().await.unwrap());

    let final_job = storage.get(job.id).await.unwrap();
    assert_eq!(final_job.status, JobStatus::Succeeded);
    assert_eq!(final_job.attempt, 3);
    assert_eq!(final_job.result, Some(json!({"ok": true})));
}

#[tokio::test]
async fn permanent_failure_reports_non_null_error() {
    struct AlwaysPermanent;
    #[async_trait]
    impl JobHandler for AlwaysPermanent {
        async fn handle(&self, _payload: Value) -> JobOutcome {
            JobOutcome::Failure { message: "permanent: malformed payload".into(), class: JobFailureClass::Permanent }
        }
    }

    let storage = InMemoryQueueStorage::new();
    let mut worker = Worker::new(storage.clone(), WorkerConfig::default());
    worker.register("bad", Arc::new(AlwaysPermanent));
    let job = storage.enqueue(Job::new("bad", json!({}))).await.unwrap();

    worker.tick().await.unwrap();
    let final_job = storage.get(job.id).await.unwrap();
    assert_eq!(final_job.status, JobStatus::Failed);
    assert!(final_job.last_error.is_some());
}

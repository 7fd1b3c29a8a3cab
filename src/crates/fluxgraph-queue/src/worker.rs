//! Worker poll loop: claim, execute, retry/fail/succeed (spec §4.8).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::instrument;

use fluxgraph_core::{EventBus, RetryPolicy};

use crate::client::QueueEvent;
use crate::error::{classify, JobFailureClass, Result};
use crate::job::{Job, JobOutcome};
use crate::limiter::RateLimiter;
use crate::storage::QueueStorage;

/// A job handler registered under a job kind name.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: Value) -> JobOutcome;
}

pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub idle_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            poll_interval: Duration::from_millis(50),
            idle_backoff: Duration::from_millis(200),
        }
    }
}

pub struct Worker {
    storage: Arc<dyn QueueStorage>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    retry_policies: HashMap<String, RetryPolicy>,
    limiter: Option<Arc<dyn RateLimiter>>,
    config: WorkerConfig,
    pub events: EventBus<QueueEvent>,
}

impl Worker {
    pub fn new(storage: Arc<dyn QueueStorage>, config: WorkerConfig) -> Self {
        Self {
            storage,
            handlers: HashMap::new(),
            retry_policies: HashMap::new(),
            limiter: None,
            config,
            events: EventBus::new(),
        }
    }

    pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(kind.into(), handler);
    }

    pub fn with_retry_policy(&mut self, kind: impl Into<String>, policy: RetryPolicy) {
        self.retry_policies.insert(kind.into(), policy);
    }

    pub fn with_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Poll once: try to claim a job, run its handler, and settle the
    /// result. Returns `Ok(true)` if a job was processed, `Ok(false)` if the
    /// queue had nothing claimable right now (caller should back off).
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn tick(&self) -> Result<bool> {
        if let Some(limiter) = &self.limiter {
            if !limiter.try_acquire().await {
                return Ok(false);
            }
        }

        let claimed = self.storage.claim_next(&self.config.worker_id, Utc::now()).await?;
        let Some(job) = claimed else {
            if let Some(limiter) = &self.limiter {
                limiter.release();
            }
            return Ok(false);
        };
        self.events.emit(QueueEvent::JobStart { job_id: job.id, worker_id: self.config.worker_id.clone() });

        if job.is_past_deadline(Utc::now()) {
            self.storage.fail(job.id, "deadline exceeded".to_string(), true).await?;
            self.events.emit(QueueEvent::JobError { job_id: job.id, message: "deadline exceeded".into(), terminal: true });
            if let Some(limiter) = &self.limiter {
                limiter.release();
            }
            return Ok(true);
        }

        let Some(handler) = self.handlers.get(&job.kind) else {
            self.storage.fail(job.id, format!("no handler registered for kind '{}'", job.kind), true).await?;
            if let Some(limiter) = &self.limiter {
                limiter.release();
            }
            return Ok(true);
        };

        let outcome = handler.handle(job.payload.clone()).await;
        self.settle(&job, outcome).await?;
        if let Some(limiter) = &self.limiter {
            limiter.release();
        }
        Ok(true)
    }

    async fn settle(&self, job: &Job, outcome: JobOutcome) -> Result<()> {
        match outcome {
            JobOutcome::Success(result) => {
                self.storage.complete(job.id, result.clone()).await?;
                self.events.emit(QueueEvent::JobComplete { job_id: job.id, result });
            }
            JobOutcome::Failure { message, class } => {
                let class = if class == JobFailureClass::Unclassified {
                    classify(&message)
                } else {
                    class
                };
                let policy = self.retry_policies.get(&job.kind).cloned().unwrap_or_default();
                let should_retry = class != JobFailureClass::Permanent
                    && class != JobFailureClass::Aborted
                    && policy.should_retry(job.attempt, class.into());

                if should_retry {
                    self.events.emit(QueueEvent::JobError { job_id: job.id, message: message.clone(), terminal: false });
                    let delay = policy.delay_for(job.attempt);
                    let next_attempt_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                    self.storage.requeue(job.id, next_attempt_at).await?;
                    self.events.emit(QueueEvent::JobRetry { job_id: job.id, message, next_attempt_at });
                } else {
                    self.storage.fail(job.id, message.clone(), true).await?;
                    self.events.emit(QueueEvent::JobError { job_id: job.id, message, terminal: true });
                }
            }
        }
        Ok(())
    }

    /// Drive `tick` forever, backing off when the queue is idle. Intended to
    /// be spawned as a background task; returns only on a storage error.
    pub async fn run_forever(&self) -> Result<()> {
        loop {
            if !self.tick().await? {
                tokio::time::sleep(self.config.idle_backoff).await;
            } else {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
    }
}

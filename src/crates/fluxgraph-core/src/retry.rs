//! Per-task retry policy (spec §9 supplement, grounded on the teacher's
//! `langgraph-core::retry` classification scheme and reused verbatim by
//! `fluxgraph-queue` for job retries).

use std::time::Duration;

/// How a failure should be treated by a retrying caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retrying can never succeed; give up immediately.
    Permanent,
    /// Retry after backoff.
    Retryable,
    /// Cooperative cancellation, not a failure; never retry.
    Aborted,
    /// Unrecognized failure shape; treated as `Retryable` with default backoff.
    Unclassified,
}

/// Exponential backoff with jitter, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn should_retry(&self, attempt: u32, class: FailureClass) -> bool {
        matches!(class, FailureClass::Retryable | FailureClass::Unclassified) && attempt < self.max_attempts
    }

    /// Delay before `attempt` (1-indexed retry count), full jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as f64 * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay.as_millis() as f64);
        let jitter = 1.0 - self.jitter_ratio + rand::random::<f64>() * (2.0 * self.jitter_ratio);
        Duration::from_millis((capped * jitter).max(0.0) as u64)
    }
}

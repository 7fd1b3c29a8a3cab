//! Pluggable rate limiters (spec §4.8): `Concurrency`, `Delay`, `Window`, and
//! `Composite` (all limiters in a set must admit a claim).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

/// A rate limiter gates job claims. `try_acquire` is non-blocking: `false`
/// means the caller should leave the job queued and try again later.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn try_acquire(&self) -> bool;
    /// Release a previously-acquired slot (only meaningful for limiters that
    /// track in-flight work, e.g. `Concurrency`; no-op for the rest).
    fn release(&self) {}
}

/// Bounds the number of concurrently in-flight jobs.
pub struct ConcurrencyLimiter {
    max: usize,
    in_flight: AtomicUsize,
}

impl ConcurrencyLimiter {
    pub fn new(max: usize) -> Self {
        Self { max, in_flight: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl RateLimiter for ConcurrencyLimiter {
    async fn try_acquire(&self) -> bool {
        loop {
            let current = self.in_flight.load(Ordering::SeqCst);
            if current >= self.max {
                return false;
            }
            if self
                .in_flight
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Enforces a minimum delay between successive claims.
pub struct DelayLimiter {
    min_gap: Duration,
    last: Mutex<Option<Instant>>,
}

impl DelayLimiter {
    pub fn new(min_gap: Duration) -> Self {
        Self { min_gap, last: Mutex::new(None) }
    }
}

#[async_trait]
impl RateLimiter for DelayLimiter {
    async fn try_acquire(&self) -> bool {
        let mut last = self.last.lock();
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < self.min_gap => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// Sliding-window limiter: at most `max` acquisitions per `window`.
pub struct WindowLimiter {
    max: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl WindowLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self { max, window, timestamps: Mutex::new(VecDeque::new()) }
    }
}

#[async_trait]
impl RateLimiter for WindowLimiter {
    async fn try_acquire(&self) -> bool {
        let mut timestamps = self.timestamps.lock();
        let now = Instant::now();
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) > self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        if timestamps.len() >= self.max {
            return false;
        }
        timestamps.push_back(now);
        true
    }
}

/// Requires every sub-limiter to admit the claim. Short-circuits (and
/// releases nothing) on the first refusal, matching "the strictest limiter
/// in the set governs" (spec §4.8).
#[derive(Default)]
pub struct CompositeLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl CompositeLimiter {
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

#[async_trait]
impl RateLimiter for CompositeLimiter {
    async fn try_acquire(&self) -> bool {
        let mut acquired = Vec::with_capacity(self.limiters.len());
        for limiter in &self.limiters {
            if limiter.try_acquire().await {
                acquired.push(limiter.as_ref());
            } else {
                for done in acquired {
                    done.release();
                }
                return false;
            }
        }
        true
    }

    fn release(&self) {
        for limiter in &self.limiters {
            limiter.release();
        }
    }
}

//! Persistent job queue: client/server/worker trio with pluggable storage,
//! rate limiting, retry classification, and deadlines (spec §4.8).

pub mod client;
pub mod error;
pub mod handle;
pub mod job;
pub mod limiter;
pub mod server;
pub mod storage;
pub mod worker;

pub use client::{QueueClient, QueueEvent};
pub use error::{classify, JobFailureClass, QueueError, Result};
pub use handle::JobHandle;
pub use job::{Job, JobOutcome, JobStatus};
pub use limiter::{CompositeLimiter, ConcurrencyLimiter, DelayLimiter, RateLimiter, WindowLimiter};
pub use server::{CleanupConfig, QueueServer, ServerEvent};
pub use storage::{InMemoryQueueStorage, QueueStorage};
pub use worker::{JobHandler, Worker, WorkerConfig};

//! Reactive task-graph execution engine: scheduler, dataflows, iterator
//! tasks, conditional branching, and a fluent workflow builder.
//!
//! See [`fluxgraph_checkpoint`] for resumable checkpoint storage and
//! `fluxgraph-queue` for the persistent job queue built on top of this
//! crate's retry classification.

pub mod builder;
pub mod cache;
pub mod compound;
pub mod conditional;
pub mod dataflow;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod iterator;
pub mod json;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod schema;
pub mod task;
pub mod visualization;

pub use cache::{InMemoryOutputCache, OutputCache};
pub use conditional::{Branch, Condition, ConditionalExecutor};
pub use compound::GraphAsTaskExecutor;
pub use dataflow::{Dataflow, DataflowStatus, GraphEvent, Port, TaskGraph};
pub use error::{GraphError, Result};
pub use event::{EventBus, EventKind, ListenerId};
pub use fingerprint::fingerprint;
pub use iterator::{MapExecutor, ReduceExecutor, WhileExecutor};
pub use registry::{ServiceRegistry, TaskKindInfo, TaskRegistry};
pub use retry::{FailureClass, RetryPolicy};
pub use scheduler::{RunReport, Scheduler, SchedulerConfig};
pub use task::{
    AbortSignal, ExecuteContext, StreamEvent, Task, TaskConfig, TaskDef, TaskEvent, TaskExecutor, TaskId,
    TaskStatus,
};
pub use builder::WorkflowBuilder;

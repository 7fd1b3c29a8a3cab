//! Task kernel (spec §4.3): lifecycle, input assembly, execution, streaming
//! accumulation, output cache, abort propagation.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use uuid::Uuid;

use crate::cache::OutputCache;
use crate::error::{GraphError, Result};
use crate::event::{EventBus, EventKind};
use crate::retry::RetryPolicy;
use crate::schema::{self, StreamMode};

pub type TaskId = Uuid;

/// State machine for a task's lifecycle (spec §4.3).
///
/// Allowed transitions: `Pending -> Processing -> (Streaming?) -> Completed |
/// Failed | Aborting -> (terminal)`. `Disabled` is reachable only from
/// `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Streaming,
    Completed,
    Failed,
    Aborting,
    Disabled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Disabled)
    }

    /// Validates a transition; used both by the kernel and by tests that
    /// assert the status-visits-only-allowed-transitions invariant (§8).
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Disabled)
                | (Pending, Failed)
                | (Processing, Streaming)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Aborting)
                | (Streaming, Completed)
                | (Streaming, Failed)
                | (Streaming, Aborting)
                | (Aborting, Failed)
                | (Aborting, Aborting)
        )
    }
}

/// Closed set of task event names (spec §6).
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Start { task_id: TaskId },
    Complete { task_id: TaskId, output: Value },
    Error { task_id: TaskId, message: String },
    Abort { task_id: TaskId },
    Progress { task_id: TaskId, pct: u8, message: Option<String> },
    Disabled { task_id: TaskId },
    Regenerate { task_id: TaskId },
    Status { task_id: TaskId, status: TaskStatus },
    SchemaChange { task_id: TaskId, input_schema: Value, output_schema: Value },
    StreamStart { task_id: TaskId },
    StreamChunk { task_id: TaskId },
    StreamEnd { task_id: TaskId },
}

impl EventKind for TaskEvent {
    fn name(&self) -> &'static str {
        match self {
            TaskEvent::Start { .. } => "start",
            TaskEvent::Complete { .. } => "complete",
            TaskEvent::Error { .. } => "error",
            TaskEvent::Abort { .. } => "abort",
            TaskEvent::Progress { .. } => "progress",
            TaskEvent::Disabled { .. } => "disabled",
            TaskEvent::Regenerate { .. } => "regenerate",
            TaskEvent::Status { .. } => "status",
            TaskEvent::SchemaChange { .. } => "schemaChange",
            TaskEvent::StreamStart { .. } => "stream_start",
            TaskEvent::StreamChunk { .. } => "stream_chunk",
            TaskEvent::StreamEnd { .. } => "stream_end",
        }
    }
}

/// Streaming contract event (spec §4.3).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta { port: String, text_delta: String },
    ObjectDelta { port: String, object_delta: Value },
    Snapshot { data: Value },
    Finish { data: Value },
    Error { error: String },
}

/// Cooperative cancellation signal shared between a running task and its
/// `ExecuteContext`.
#[derive(Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Per-run context handed to a task's `execute`/`execute_stream`.
///
/// Carries the cancellation token, progress reporter, and a service registry
/// explicitly, rather than threading them ambiently through every call
/// (spec §9 redesign flag).
pub struct ExecuteContext {
    pub signal: AbortSignal,
    last_progress: Arc<AtomicU8>,
    events: EventBus<TaskEvent>,
    task_id: TaskId,
    pub registry: Arc<crate::registry::ServiceRegistry>,
}

impl ExecuteContext {
    pub fn new(
        task_id: TaskId,
        signal: AbortSignal,
        events: EventBus<TaskEvent>,
        registry: Arc<crate::registry::ServiceRegistry>,
    ) -> Self {
        Self {
            signal,
            last_progress: Arc::new(AtomicU8::new(0)),
            events,
            task_id,
            registry,
        }
    }

    /// Clamp to `[0,100]`, always deliver the last call even under rate
    /// limiting, and never regress (progress is non-decreasing, §8).
    pub fn update_progress(&self, pct: u8, message: Option<String>) {
        let clamped = pct.min(100);
        let prev = self.last_progress.load(Ordering::SeqCst);
        let next = clamped.max(prev);
        self.last_progress.store(next, Ordering::SeqCst);
        self.events.emit(TaskEvent::Progress {
            task_id: self.task_id,
            pct: next,
            message,
        });
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }
}

/// A task implementation: the black-box function(s) satisfying the core
/// contracts of spec §3/§4.3. Implementors are registered under a kind name
/// in a [`crate::registry::TaskRegistry`].
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, input: Value, ctx: &ExecuteContext) -> std::result::Result<Value, String>;

    /// Fast path used when a reactive re-run is requested instead of a full
    /// `execute`. Returning `None` means "not supported; fall back to
    /// `execute`".
    async fn execute_reactive(
        &self,
        _input: Value,
        _prior_output: Value,
    ) -> Option<std::result::Result<Value, String>> {
        None
    }

    /// Lazy sequence of [`StreamEvent`]s. `None` means this task kind does
    /// not support streaming even if its output schema declares `x-stream`.
    fn execute_stream(
        &self,
        _input: Value,
        _ctx: ExecuteContext,
    ) -> Option<BoxStream<'static, StreamEvent>> {
        None
    }
}

/// Static configuration for a task instance.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TaskConfig {
    pub id: TaskId,
    pub title: Option<String>,
    pub cacheable: bool,
    #[serde(default)]
    pub extras: Value,
}

impl TaskConfig {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: Some(title.into()),
            cacheable: false,
            extras: Value::Null,
        }
    }
}

/// A task's identity, schemas, defaults, and pluggable behavior — everything
/// that doesn't change while the task runs.
pub struct TaskDef {
    pub kind: String,
    pub config: TaskConfig,
    pub defaults: Value,
    pub input_schema: Value,
    pub output_schema: Value,
    pub executor: Arc<dyn TaskExecutor>,
    pub retry_policy: Option<RetryPolicy>,
    /// Owned sub-graph for compound/iterator/while tasks. A graph owns its
    /// tasks exclusively; a task owns its optional sub-graph exclusively
    /// (spec §3 Ownership).
    pub sub_graph: Option<Box<crate::dataflow::TaskGraph>>,
}

/// A task's mutable run state plus its event emitter.
pub struct Task {
    pub def: TaskDef,
    pub status: TaskStatus,
    pub run_input_data: Value,
    pub run_output_data: Value,
    pub progress: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub events: EventBus<TaskEvent>,
    signal: AbortSignal,
}

impl Task {
    pub fn new(def: TaskDef) -> Self {
        Self {
            def,
            status: TaskStatus::Pending,
            run_input_data: Value::Null,
            run_output_data: Value::Null,
            progress: 0,
            started_at: None,
            completed_at: None,
            error: None,
            events: EventBus::new(),
            signal: AbortSignal::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.def.config.id
    }

    fn transition(&mut self, next: TaskStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal task status transition {:?} -> {:?}",
            self.status,
            next
        );
        self.status = next;
        self.events.emit(TaskEvent::Status { task_id: self.id(), status: next });
    }

    /// Disable this task (only legal from `Pending`, spec §3).
    pub fn disable(&mut self) {
        if self.status == TaskStatus::Pending {
            self.transition(TaskStatus::Disabled);
            self.events.emit(TaskEvent::Disabled { task_id: self.id() });
        }
    }

    /// Force this task's status directly, bypassing transition validation.
    /// Used only when restoring state from a checkpoint (spec §4.7), where
    /// the snapshot's status was already reached legally in a prior run.
    pub fn restore_status(&mut self, status: TaskStatus) {
        self.status = status;
    }

    /// Mark this task `FAILED` without running it, because an upstream task
    /// it depends on failed or was disabled (spec §4.5). Only legal from
    /// `Pending`, mirroring [`disable`](Self::disable)'s `Pending`-only
    /// contract.
    pub fn fail_unreachable(&mut self, message: impl Into<String>) {
        if self.status == TaskStatus::Pending {
            let message = message.into();
            self.error = Some(message.clone());
            self.transition(TaskStatus::Failed);
            self.events.emit(TaskEvent::Error { task_id: self.id(), message });
        }
    }

    /// Cooperative abort: signal the context, mark `Aborting`, emit `abort`.
    /// Tasks already `Completed`/`Failed` ignore this.
    pub fn abort(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.signal.trigger();
        if matches!(self.status, TaskStatus::Processing | TaskStatus::Streaming) {
            self.transition(TaskStatus::Aborting);
        } else if self.status == TaskStatus::Pending {
            self.status = TaskStatus::Aborting;
        }
        self.events.emit(TaskEvent::Abort { task_id: self.id() });
    }

    /// Merge declared defaults, construction defaults, and a run override
    /// into the resolved input (spec §4.3 input assembly, steps 1/2/5 —
    /// incoming dataflows are merged in by the scheduler before `run` is
    /// called, since only the scheduler knows the graph topology).
    pub fn assemble_input(&self, override_input: &Value) -> Value {
        let mut merged = merge_json(schema_defaults(&self.def.input_schema), self.def.defaults.clone());
        merged = merge_json(merged, self.run_input_data.clone());
        merge_json(merged, override_input.clone())
    }

    /// Run this task to completion given its fully-resolved input (already
    /// merged with incoming dataflow values by the scheduler).
    pub async fn run(
        &mut self,
        input: Value,
        cache: Option<&dyn OutputCache>,
        fingerprint: Option<&str>,
        registry: Arc<crate::registry::ServiceRegistry>,
    ) -> Result<Value> {
        let task_id = self.id();
        self.run_input_data = deep_copy_checked(input)?;
        self.transition(TaskStatus::Processing);
        self.started_at = Some(Utc::now());
        self.events.emit(TaskEvent::Start { task_id });

        if self.def.config.cacheable {
            if let (Some(cache), Some(fp)) = (cache, fingerprint) {
                if let Some(cached) = cache.get(&self.def.kind, fp) {
                    self.replay_cache_hit(cached.clone());
                    return Ok(cached);
                }
            }
        }

        let stream_mode = schema::output_stream_mode(&self.def.kind, &self.def.output_schema)?;
        let mut attempt: u32 = 1;
        let result = loop {
            let stream = if stream_mode != StreamMode::None {
                let stream_ctx = ExecuteContext::new(task_id, self.signal.clone(), self.events.clone(), registry.clone());
                self.def.executor.execute_stream(self.run_input_data.clone(), stream_ctx)
            } else {
                None
            };

            let attempt_result = if let Some(stream) = stream {
                self.drive_stream(stream, stream_mode).await
            } else {
                let ctx = ExecuteContext::new(task_id, self.signal.clone(), self.events.clone(), registry.clone());
                self.def
                    .executor
                    .execute(self.run_input_data.clone(), &ctx)
                    .await
                    .map_err(|message| GraphError::TaskFailed { task_id, message })
            };

            match (&attempt_result, &self.def.retry_policy) {
                (Err(_), Some(policy)) if !self.signal.is_aborted() => {
                    // Task-level retries have no failure taxonomy from the
                    // executor, so any non-aborted error is treated as
                    // `Retryable` (§9 supplement).
                    if policy.should_retry(attempt, crate::retry::FailureClass::Retryable) {
                        let delay = policy.delay_for(attempt);
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    break attempt_result;
                }
                _ => break attempt_result,
            }
        };

        match result {
            Ok(output) => {
                self.run_output_data = output.clone();
                self.progress = 100;
                self.completed_at = Some(Utc::now());
                self.transition(TaskStatus::Completed);
                self.events.emit(TaskEvent::Complete { task_id, output: output.clone() });
                if self.def.config.cacheable {
                    if let (Some(cache), Some(fp)) = (cache, fingerprint) {
                        cache.put(&self.def.kind, fp, output.clone());
                    }
                }
                Ok(output)
            }
            Err(err) => {
                self.error = Some(err.to_string());
                if self.signal.is_aborted() {
                    self.transition(TaskStatus::Aborting);
                    self.events.emit(TaskEvent::Abort { task_id });
                } else {
                    self.transition(TaskStatus::Failed);
                    self.events.emit(TaskEvent::Error { task_id, message: err.to_string() });
                }
                Err(err)
            }
        }
    }

    /// Emit the streaming surface for a cache hit without invoking
    /// `execute`: `stream_start`, one `finish` chunk, `stream_end` (§4.3
    /// "cache hits ... must still reproduce the streaming surface").
    fn replay_cache_hit(&mut self, output: Value) {
        let task_id = self.id();
        self.events.emit(TaskEvent::StreamStart { task_id });
        self.events.emit(TaskEvent::StreamChunk { task_id });
        self.run_output_data = output.clone();
        self.progress = 100;
        self.completed_at = Some(Utc::now());
        self.transition(TaskStatus::Completed);
        self.events.emit(TaskEvent::StreamEnd { task_id });
        self.events.emit(TaskEvent::Complete { task_id, output });
    }

    async fn drive_stream(
        &mut self,
        mut stream: BoxStream<'static, StreamEvent>,
        mode: StreamMode,
    ) -> std::result::Result<Value, GraphError> {
        let task_id = self.id();
        let mut accumulated = serde_json::Map::new();
        let mut first_chunk = true;
        let mut final_value: Option<Value> = None;

        while let Some(event) = stream.next().await {
            if first_chunk {
                self.transition(TaskStatus::Streaming);
                self.events.emit(TaskEvent::StreamStart { task_id });
                first_chunk = false;
            }
            self.events.emit(TaskEvent::StreamChunk { task_id });
            match event {
                StreamEvent::TextDelta { port, text_delta } => {
                    let entry = accumulated.entry(port).or_insert_with(|| Value::String(String::new()));
                    if let Value::String(s) = entry {
                        s.push_str(&text_delta);
                    }
                    self.run_output_data = Value::Object(accumulated.clone());
                }
                StreamEvent::ObjectDelta { port, object_delta } => {
                    let entry = accumulated.entry(port).or_insert(Value::Null);
                    *entry = merge_json(entry.clone(), object_delta);
                    self.run_output_data = Value::Object(accumulated.clone());
                }
                StreamEvent::Snapshot { data } => {
                    if mode == StreamMode::Replace {
                        self.run_output_data = data.clone();
                        final_value = Some(data);
                    }
                }
                StreamEvent::Finish { data } => {
                    final_value = Some(if mode == StreamMode::Replace {
                        data
                    } else {
                        Value::Object(accumulated.clone())
                    });
                }
                StreamEvent::Error { error } => {
                    self.events.emit(TaskEvent::StreamEnd { task_id });
                    return Err(GraphError::TaskFailed { task_id, message: error });
                }
            }
        }
        self.events.emit(TaskEvent::StreamEnd { task_id });
        Ok(final_value.unwrap_or(Value::Object(accumulated)))
    }
}

/// Deep-copy a JSON value so downstream mutation by one task never aliases
/// another task's input.
///
/// `serde_json::Value` is an owned tree, so true reference cycles (as in the
/// source system's object graph) cannot occur structurally; this still
/// performs the deep clone the contract requires and guards against
/// pathologically deep nesting (which would indicate a malformed input
/// rather than a true cycle, since a JSON tree cannot alias itself) by
/// treating excessive depth as [`GraphError::CircularInput`].
pub fn deep_copy_checked(value: Value) -> Result<Value> {
    const MAX_DEPTH: usize = 512;
    fn check(value: &Value, depth: usize) -> std::result::Result<(), ()> {
        if depth > MAX_DEPTH {
            return Err(());
        }
        match value {
            Value::Array(items) => items.iter().try_for_each(|v| check(v, depth + 1)),
            Value::Object(map) => map.values().try_for_each(|v| check(v, depth + 1)),
            _ => Ok(()),
        }
    }
    check(&value, 0).map_err(|_| GraphError::CircularInput { task_id: Uuid::nil() })?;
    Ok(value)
}

/// Merge `overlay` onto `base`: objects merge key-by-key (overlay wins on
/// conflict), everything else is replaced outright.
pub fn merge_json(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                let merged = match base_map.remove(&k) {
                    Some(existing) => merge_json(existing, v),
                    None => v,
                };
                base_map.insert(k, merged);
            }
            Value::Object(base_map)
        }
        (_, Value::Null) => Value::Null,
        (_, overlay) => overlay,
    }
}

fn schema_defaults(schema: &Value) -> Value {
    let Some(props) = schema::properties(schema) else {
        return Value::Object(Default::default());
    };
    let mut map = serde_json::Map::new();
    for (name, port_schema) in props {
        if let Some(default) = port_schema.get("default") {
            map.insert(name, default.clone());
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceRegistry;
    use serde_json::json;

    struct Double;
    #[async_trait]
    impl TaskExecutor for Double {
        async fn execute(&self, input: Value, _ctx: &ExecuteContext) -> std::result::Result<Value, String> {
            let v = input["value"].as_i64().unwrap_or(0);
            Ok(json!({ "doubled": v * 2 }))
        }
    }

    fn task_with(executor: Arc<dyn TaskExecutor>) -> Task {
        Task::new(TaskDef {
            kind: "double".into(),
            config: TaskConfig::new("double"),
            defaults: json!({}),
            input_schema: json!({"properties": {"value": {"type": "number"}}, "required": ["value"]}),
            output_schema: json!({"properties": {"doubled": {"type": "number"}}}),
            executor,
            retry_policy: None,
            sub_graph: None,
        })
    }

    #[tokio::test]
    async fn run_completes_and_emits_events() {
        let mut task = task_with(Arc::new(Double));
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let e = events.clone();
        task.events.on("start", move |ev: &TaskEvent| {
            if let TaskEvent::Start { .. } = ev {
                e.lock().push("start");
            }
        });
        let e = events.clone();
        task.events.on("complete", move |ev: &TaskEvent| {
            if let TaskEvent::Complete { .. } = ev {
                e.lock().push("complete");
            }
        });

        let output = task
            .run(json!({"value": 10}), None, None, Arc::new(ServiceRegistry::default()))
            .await
            .unwrap();
        assert_eq!(output, json!({"doubled": 20}));
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(*events.lock(), vec!["start", "complete"]);
    }

    #[tokio::test]
    async fn abort_before_run_ignored_when_terminal() {
        let mut task = task_with(Arc::new(Double));
        task.run(json!({"value": 1}), None, None, Arc::new(ServiceRegistry::default()))
            .await
            .unwrap();
        task.abort();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn merge_json_overlay_wins() {
        let base = json!({"a": 1, "b": {"x": 1}});
        let overlay = json!({"b": {"y": 2}, "c": 3});
        let merged = merge_json(base, overlay);
        assert_eq!(merged, json!({"a": 1, "b": {"x": 1, "y": 2}, "c": 3}));
    }
}

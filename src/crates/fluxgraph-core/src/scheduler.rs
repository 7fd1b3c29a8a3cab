//! Bounded-concurrency wavefront scheduler (spec §4.5).
//!
//! Execution proceeds in supersteps, Pregel-style: every task whose
//! predecessors have all completed (or have no predecessors) in the current
//! wavefront is eligible; eligible tasks run concurrently, bounded by
//! `max_concurrency`, and the scheduler barrier-syncs before computing the
//! next wavefront. A task with a failed predecessor propagates
//! `UpstreamMissing` to all of its descendants instead of running them.
//!
//! Two spec-named behaviors are wired in here rather than left to callers:
//! a task whose output carries the `activeBranches`/`branchTargets`
//! structural-routing convention (see [`crate::conditional`]) triggers
//! [`TaskGraph::disable_cascade`] on every branch target not selected, and a
//! checkpoint store, if configured, is snapshotted after every wave so a run
//! can be resumed later.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use fluxgraph_checkpoint::{CheckpointData, CheckpointStore, DataflowState, TaskState};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::instrument;
use uuid::Uuid;

use crate::cache::OutputCache;
use crate::dataflow::{DataflowStatus, Port, TaskGraph};
use crate::error::{GraphError, Result};
use crate::fingerprint::fingerprint;
use crate::registry::ServiceRegistry;
use crate::schema;
use crate::task::{TaskId, TaskStatus};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrency: usize,
    pub deadline: Option<std::time::Duration>,
    /// Stop scheduling new waves as soon as any task fails, rather than
    /// continuing to run every branch the failure doesn't reach (spec §4.5).
    pub fail_fast: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_concurrency: 8, deadline: None, fail_fast: false }
    }
}

/// Outcome of one full scheduler run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub completed: Vec<TaskId>,
    pub failed: Vec<(TaskId, String)>,
    pub skipped: Vec<TaskId>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    cache: Option<Arc<dyn OutputCache>>,
    registry: Arc<ServiceRegistry>,
    checkpoint: Option<(Arc<dyn CheckpointStore>, String)>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config, cache: None, registry: Arc::new(ServiceRegistry::default()), checkpoint: None }
    }

    pub fn with_cache(mut self, cache: Arc<dyn OutputCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_registry(mut self, registry: Arc<ServiceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Checkpoint `graph`'s state to `store` under `thread_id` after every
    /// wave (spec §4.7), enabling [`resume`](Self::resume) to continue a run
    /// from the latest snapshot.
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>, thread_id: impl Into<String>) -> Self {
        self.checkpoint = Some((store, thread_id.into()));
        self
    }

    /// Run `graph` to completion (every reachable, non-`Disabled` task either
    /// completes, fails, or is skipped as unreachable).
    #[instrument(skip(self, graph), fields(graph_id = %graph.id))]
    pub async fn run(&self, graph: &mut TaskGraph) -> Result<RunReport> {
        self.run_from(graph, None).await
    }

    /// Resume a run from the latest checkpoint saved for `thread_id`:
    /// restores every task's and dataflow's status/data, then continues
    /// scheduling waves from there. Requires [`with_checkpoint_store`]. Runs
    /// from scratch if no checkpoint exists yet for `thread_id`.
    #[instrument(skip(self, graph), fields(graph_id = %graph.id))]
    pub async fn resume(&self, graph: &mut TaskGraph, thread_id: &str) -> Result<RunReport> {
        let (store, _) = self
            .checkpoint
            .as_ref()
            .ok_or_else(|| GraphError::custom("resume requires a checkpoint store (with_checkpoint_store)"))?;
        match store.get_latest_checkpoint(thread_id).await? {
            Some(checkpoint) => {
                restore_checkpoint(graph, &checkpoint);
                self.run_from(graph, Some(checkpoint)).await
            }
            None => self.run_from(graph, None).await,
        }
    }

    async fn run_from(&self, graph: &mut TaskGraph, mut last_checkpoint: Option<CheckpointData>) -> Result<RunReport> {
        let deadline = self.config.deadline.map(|d| tokio::time::Instant::now() + d);
        let mut report = RunReport::default();
        let mut failed: HashSet<TaskId> = HashSet::new();
        let mut done: HashSet<TaskId> = HashSet::new();

        for task in graph.tasks() {
            match task.status {
                TaskStatus::Completed => {
                    done.insert(task.id());
                }
                TaskStatus::Failed => {
                    failed.insert(task.id());
                }
                _ => {}
            }
        }

        loop {
            if let Some(dl) = deadline {
                if tokio::time::Instant::now() >= dl {
                    return Err(GraphError::DeadlineExceeded);
                }
            }

            if self.config.fail_fast && !failed.is_empty() {
                break;
            }

            let wave = self.next_wave(graph, &done, &failed, &mut report);
            if wave.is_empty() {
                break;
            }

            let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
            let mut handles = Vec::with_capacity(wave.len());
            for task_id in wave {
                let input = graph.resolve_input(task_id);
                if let Some(port) = missing_required_input(graph, task_id, &input) {
                    let message = GraphError::MissingRequiredInput { task_id, port }.to_string();
                    if let Some(task) = graph.task_mut(task_id) {
                        task.fail_unreachable(message.clone());
                    }
                    graph.mark_outgoing_dataflows(task_id, DataflowStatus::Failed);
                    failed.insert(task_id);
                    report.failed.push((task_id, message));
                    continue;
                }

                let mut task = graph.take_task(task_id).expect("task present in its own graph");
                let fp = task
                    .def
                    .config
                    .cacheable
                    .then(|| fingerprint(&task.def.kind, &input));
                let cache = self.cache.clone();
                let registry = self.registry.clone();
                let semaphore = semaphore.clone();
                handles.push(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                    let result = task.run(input, cache.as_deref(), fp.as_deref(), registry).await;
                    (task_id, task, result)
                });
            }

            let finished = futures::future::join_all(handles).await;
            for (task_id, task, result) in finished {
                graph.put_task_back(task);
                match result {
                    Ok(_) => {
                        done.insert(task_id);
                        report.completed.push(task_id);
                        graph.mark_outgoing_dataflows(task_id, DataflowStatus::Completed);
                        apply_branch_routing(graph, task_id);
                    }
                    Err(err) => {
                        failed.insert(task_id);
                        report.failed.push((task_id, err.to_string()));
                        graph.mark_outgoing_dataflows(task_id, DataflowStatus::Failed);
                    }
                }
            }

            if let Some((store, thread_id)) = &self.checkpoint {
                let snapshot = build_checkpoint(graph, thread_id, last_checkpoint.as_ref());
                store.save_checkpoint(snapshot.clone()).await?;
                last_checkpoint = Some(snapshot);
            }
        }

        for task_id in report.skipped.clone() {
            if let Some(task) = graph.task_mut(task_id) {
                task.fail_unreachable("unreachable: an upstream task failed or was disabled".to_string());
            }
            graph.mark_outgoing_dataflows(task_id, DataflowStatus::Failed);
        }

        Ok(report)
    }

    /// Compute the next eligible wavefront: non-terminal tasks whose every
    /// predecessor is in `done`, skipping (and recording as
    /// [`GraphError::UpstreamMissing`]) any task with a predecessor in
    /// `failed`.
    fn next_wave(
        &self,
        graph: &TaskGraph,
        done: &HashSet<TaskId>,
        failed: &HashSet<TaskId>,
        report: &mut RunReport,
    ) -> Vec<TaskId> {
        let mut wave = Vec::new();
        let mut newly_skipped = Vec::new();
        for task in graph.tasks() {
            let id = task.id();
            if task.status != TaskStatus::Pending || done.contains(&id) || failed.contains(&id) {
                continue;
            }
            if report.skipped.contains(&id) {
                continue;
            }
            let preds: Vec<TaskId> = graph.predecessors(id).collect();
            if preds.iter().any(|p| failed.contains(p) || report.skipped.contains(p)) {
                newly_skipped.push(id);
                continue;
            }
            if preds.iter().all(|p| done.contains(p)) {
                wave.push(id);
            }
        }
        report.skipped.extend(newly_skipped);
        wave
    }
}

/// `GraphError::MissingRequiredInput`'s port name if `input` is missing a
/// value for one of `task_id`'s declared-required input ports.
fn missing_required_input(graph: &TaskGraph, task_id: TaskId, input: &Value) -> Option<String> {
    let task = graph.task(task_id)?;
    let props = schema::properties(&task.def.input_schema)?;
    for port in props.keys() {
        if schema::is_required(&task.def.input_schema, port) {
            let present = input.get(port).map(|v| !v.is_null()).unwrap_or(false);
            if !present {
                return Some(port.clone());
            }
        }
    }
    None
}

/// Inspect a just-completed task's output for the `activeBranches`/
/// `branchTargets` structural-routing convention (spec §4.6, see
/// [`crate::conditional::ConditionalExecutor`]) and disable-cascade every
/// branch target that wasn't selected.
fn apply_branch_routing(graph: &mut TaskGraph, task_id: TaskId) {
    let Some(task) = graph.task(task_id) else { return };
    let output = &task.run_output_data;
    let (Some(active), Some(targets)) = (
        output.get("activeBranches").and_then(Value::as_array),
        output.get("branchTargets").and_then(Value::as_object),
    ) else {
        return;
    };
    let active_ids: HashSet<&str> = active.iter().filter_map(Value::as_str).collect();
    let inactive: Vec<Uuid> = targets
        .iter()
        .filter(|(id, _)| !active_ids.contains(id.as_str()))
        .filter_map(|(_, v)| v.as_str().and_then(|s| Uuid::parse_str(s).ok()))
        .collect();
    for target in inactive {
        graph.disable_cascade(target);
    }
}

fn task_status_to_string(status: TaskStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "PENDING".to_string())
}

fn task_status_from_string(s: &str) -> Option<TaskStatus> {
    serde_json::from_value(Value::String(s.to_string())).ok()
}

fn dataflow_status_to_string(status: DataflowStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "PENDING".to_string())
}

fn dataflow_status_from_string(s: &str) -> DataflowStatus {
    serde_json::from_value(Value::String(s.to_string())).unwrap_or(DataflowStatus::Pending)
}

/// Build the next checkpoint in the chain (or a root checkpoint if `parent`
/// is `None`) from `graph`'s current state.
fn build_checkpoint(graph: &TaskGraph, thread_id: &str, parent: Option<&CheckpointData>) -> CheckpointData {
    let graph_json = graph.to_json();
    let mut data = match parent {
        Some(p) => p.next(graph_json),
        None => CheckpointData::root(thread_id.to_string(), graph_json),
    };
    data.task_states = graph
        .tasks()
        .map(|t| TaskState {
            task_id: t.id(),
            status: task_status_to_string(t.status),
            run_input_data: t.run_input_data.clone(),
            run_output_data: t.run_output_data.clone(),
            progress: t.progress,
            error: t.error.clone(),
        })
        .collect();
    data.dataflow_states = graph
        .dataflows()
        .iter()
        .map(|d| DataflowState {
            source_task_id: d.source.task_id,
            source_task_port_id: d.source.port.clone(),
            target_task_id: d.target.task_id,
            target_task_port_id: d.target.port.clone(),
            status: dataflow_status_to_string(d.status),
        })
        .collect();
    data
}

/// Restore task and dataflow state from a checkpoint onto `graph` ahead of a
/// resumed run (spec §4.7).
fn restore_checkpoint(graph: &mut TaskGraph, checkpoint: &CheckpointData) {
    for state in &checkpoint.task_states {
        if let Some(task) = graph.task_mut(state.task_id) {
            task.run_input_data = state.run_input_data.clone();
            task.run_output_data = state.run_output_data.clone();
            task.progress = state.progress;
            task.error = state.error.clone();
            if let Some(status) = task_status_from_string(&state.status) {
                task.restore_status(status);
            }
        }
    }
    for state in &checkpoint.dataflow_states {
        let source = Port::new(state.source_task_id, state.source_task_port_id.clone());
        let target = Port::new(state.target_task_id, state.target_task_port_id.clone());
        graph.restore_dataflow_status(&source, &target, dataflow_status_from_string(&state.status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::{Dataflow, Port};
    use crate::task::{Task, TaskConfig, TaskDef, TaskExecutor};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Echo;
    #[async_trait]
    impl TaskExecutor for Echo {
        async fn execute(&self, input: Value, _ctx: &crate::task::ExecuteContext) -> std::result::Result<Value, String> {
            Ok(json!({ "value": input.get("value").cloned().unwrap_or(Value::Null) }))
        }
    }

    struct AlwaysFail;
    #[async_trait]
    impl TaskExecutor for AlwaysFail {
        async fn execute(&self, _input: Value, _ctx: &crate::task::ExecuteContext) -> std::result::Result<Value, String> {
            Err("boom".to_string())
        }
    }

    fn task(executor: Arc<dyn TaskExecutor>) -> Task {
        Task::new(TaskDef {
            kind: "echo".into(),
            config: TaskConfig::new("echo"),
            defaults: json!({}),
            input_schema: json!({"properties": {"value": {}}}),
            output_schema: json!({"properties": {"value": {}}}),
            executor,
            retry_policy: None,
            sub_graph: None,
        })
    }

    #[tokio::test]
    async fn runs_chain_in_dependency_order() {
        let mut graph = TaskGraph::new();
        let a = graph.add_task(task(Arc::new(Echo))).unwrap();
        let b = graph.add_task(task(Arc::new(Echo))).unwrap();
        graph.add_dataflow(Dataflow::new(Port::new(a, "value"), Port::new(b, "value"))).unwrap();
        graph.task_mut(a).unwrap().run_input_data = json!({"value": 7});

        let scheduler = Scheduler::new(SchedulerConfig::default());
        let report = scheduler.run(&mut graph).await.unwrap();
        assert_eq!(report.completed.len(), 2);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn failed_upstream_skips_downstream() {
        let mut graph = TaskGraph::new();
        let a = graph.add_task(task(Arc::new(AlwaysFail))).unwrap();
        let b = graph.add_task(task(Arc::new(Echo))).unwrap();
        graph.add_dataflow(Dataflow::new(Port::new(a, "value"), Port::new(b, "value"))).unwrap();

        let scheduler = Scheduler::new(SchedulerConfig::default());
        let report = scheduler.run(&mut graph).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.skipped, vec![b]);
        assert!(report.completed.is_empty());
    }

    #[tokio::test]
    async fn disabled_tasks_never_run() {
        let mut graph = TaskGraph::new();
        let a = graph.add_task(task(Arc::new(Echo))).unwrap();
        graph.task_mut(a).unwrap().disable();

        let scheduler = Scheduler::new(SchedulerConfig::default());
        let report = scheduler.run(&mut graph).await.unwrap();
        assert!(report.completed.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn skipped_tasks_transition_to_failed() {
        let mut graph = TaskGraph::new();
        let a = graph.add_task(task(Arc::new(AlwaysFail))).unwrap();
        let b = graph.add_task(task(Arc::new(Echo))).unwrap();
        graph.add_dataflow(Dataflow::new(Port::new(a, "value"), Port::new(b, "value"))).unwrap();

        let scheduler = Scheduler::new(SchedulerConfig::default());
        let report = scheduler.run(&mut graph).await.unwrap();
        assert_eq!(report.skipped, vec![b]);
        assert_eq!(graph.task(b).unwrap().status, TaskStatus::Failed);
        assert!(graph.task(b).unwrap().error.is_some());
    }

    #[tokio::test]
    async fn fail_fast_stops_scheduling_new_waves() {
        let mut graph = TaskGraph::new();
        let a = graph.add_task(task(Arc::new(AlwaysFail))).unwrap();
        let b = graph.add_task(task(Arc::new(Echo))).unwrap();
        // `b` has no dependency on `a`; without fail_fast it would still run.
        graph.task_mut(b).unwrap().run_input_data = json!({"value": 1});

        let scheduler = Scheduler::new(SchedulerConfig { fail_fast: true, ..SchedulerConfig::default() });
        let report = scheduler.run(&mut graph).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, a);
        assert!(report.completed.is_empty());
        assert_eq!(graph.task(b).unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn missing_required_input_fails_the_task_without_running_it() {
        let mut graph = TaskGraph::new();
        let a = Task::new(TaskDef {
            kind: "echo".into(),
            config: TaskConfig::new("echo"),
            defaults: json!({}),
            input_schema: json!({"properties": {"value": {}}, "required": ["value"]}),
            output_schema: json!({"properties": {"value": {}}}),
            executor: Arc::new(Echo),
            retry_policy: None,
            sub_graph: None,
        });
        let id = graph.add_task(a).unwrap();

        let scheduler = Scheduler::new(SchedulerConfig::default());
        let report = scheduler.run(&mut graph).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, id);
        assert_eq!(graph.task(id).unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn checkpoint_and_resume_round_trips_completed_state() {
        let store: Arc<dyn CheckpointStore> = Arc::new(fluxgraph_checkpoint::InMemoryCheckpointStore::new());
        let mut graph = TaskGraph::new();
        let a = graph.add_task(task(Arc::new(Echo))).unwrap();
        graph.task_mut(a).unwrap().run_input_data = json!({"value": 42});

        let scheduler = Scheduler::new(SchedulerConfig::default()).with_checkpoint_store(store.clone(), "thread-1");
        let report = scheduler.run(&mut graph).await.unwrap();
        assert_eq!(report.completed, vec![a]);

        let checkpoint = store.get_latest_checkpoint("thread-1").await.unwrap().unwrap();
        assert_eq!(checkpoint.task_states.len(), 1);
        assert_eq!(checkpoint.task_states[0].status, "COMPLETED");

        let mut fresh_graph = TaskGraph::new();
        let fresh_scheduler =
            Scheduler::new(SchedulerConfig::default()).with_checkpoint_store(store.clone(), "thread-1");
        // Resuming into a graph missing the checkpointed task id is a no-op
        // restore; the real exercise is that `resume` reads the snapshot back
        // without error when no newer checkpoint exists.
        let resumed_report = fresh_scheduler.resume(&mut fresh_graph, "thread-1").await.unwrap();
        assert!(resumed_report.completed.is_empty());
    }
}

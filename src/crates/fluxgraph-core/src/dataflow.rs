//! Task graph: task ownership, dataflow edges, cycle detection, disable
//! cascade (spec §4.1/§4.5).

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{GraphError, Result};
use crate::event::{EventBus, EventKind};
use crate::task::{Task, TaskId, TaskStatus};

/// A named port on a task: `(task_id, port_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    pub task_id: TaskId,
    pub port: String,
}

impl Port {
    pub fn new(task_id: TaskId, port: impl Into<String>) -> Self {
        Self { task_id, port: port.into() }
    }
}

/// Mirrors the status of the edge's carried value (spec §4.1): an edge starts
/// `Pending`, becomes `Completed` once its source task completes and the
/// value has been delivered, `Disabled` if cascaded away by an untaken
/// conditional branch, or `Failed` if its source task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataflowStatus {
    Pending,
    Completed,
    Disabled,
    Failed,
}

/// A typed edge carrying `source`'s output port value into `target`'s input
/// port on every run where `source` completes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dataflow {
    pub id: Uuid,
    pub source: Port,
    pub target: Port,
    #[serde(default = "default_dataflow_status")]
    pub status: DataflowStatus,
}

fn default_dataflow_status() -> DataflowStatus {
    DataflowStatus::Pending
}

impl Dataflow {
    pub fn new(source: Port, target: Port) -> Self {
        Self { id: Uuid::new_v4(), source, target, status: DataflowStatus::Pending }
    }
}

#[derive(Debug, Clone)]
pub enum GraphEvent {
    TaskAdded { task_id: TaskId },
    TaskRemoved { task_id: TaskId },
    DataflowAdded { dataflow_id: Uuid },
    DataflowRemoved { dataflow_id: Uuid },
}

impl EventKind for GraphEvent {
    fn name(&self) -> &'static str {
        match self {
            GraphEvent::TaskAdded { .. } => "task_added",
            GraphEvent::TaskRemoved { .. } => "task_removed",
            GraphEvent::DataflowAdded { .. } => "dataflow_added",
            GraphEvent::DataflowRemoved { .. } => "dataflow_removed",
        }
    }
}

/// A graph owns its tasks exclusively (spec §3 Ownership): removing a task
/// removes every dataflow touching it.
pub struct TaskGraph {
    pub id: Uuid,
    tasks: HashMap<TaskId, Task>,
    dataflows: Vec<Dataflow>,
    pub events: EventBus<GraphEvent>,
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            tasks: HashMap::new(),
            dataflows: Vec::new(),
            events: EventBus::new(),
        }
    }

    pub fn add_task(&mut self, task: Task) -> Result<TaskId> {
        let id = task.id();
        if self.tasks.contains_key(&id) {
            return Err(GraphError::DuplicateTaskId(id));
        }
        self.tasks.insert(id, task);
        self.events.emit(GraphEvent::TaskAdded { task_id: id });
        Ok(id)
    }

    pub fn remove_task(&mut self, task_id: TaskId) -> Option<Task> {
        let removed = self.tasks.remove(&task_id);
        if removed.is_some() {
            self.dataflows.retain(|d| d.source.task_id != task_id && d.target.task_id != task_id);
            self.events.emit(GraphEvent::TaskRemoved { task_id });
        }
        removed
    }

    pub fn task(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.get(&task_id)
    }

    pub fn task_mut(&mut self, task_id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&task_id)
    }

    /// Temporarily take ownership of a task out of the graph so it can run
    /// concurrently with its wavefront siblings without holding `&mut self`.
    /// Pair with [`put_task_back`](Self::put_task_back).
    pub fn take_task(&mut self, task_id: TaskId) -> Option<Task> {
        self.tasks.remove(&task_id)
    }

    /// Restore a task taken via [`take_task`](Self::take_task). Does not
    /// re-emit `task_added` since the task was never conceptually removed.
    pub fn put_task_back(&mut self, task: Task) {
        self.tasks.insert(task.id(), task);
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn dataflows(&self) -> &[Dataflow] {
        &self.dataflows
    }

    /// Add a dataflow edge, rejecting it with [`GraphError::CyclicDataflow`]
    /// if it would create a cycle in the task-level dependency graph.
    pub fn add_dataflow(&mut self, dataflow: Dataflow) -> Result<Uuid> {
        if !self.tasks.contains_key(&dataflow.source.task_id) {
            return Err(GraphError::UnknownTaskId(dataflow.source.task_id));
        }
        if !self.tasks.contains_key(&dataflow.target.task_id) {
            return Err(GraphError::UnknownTaskId(dataflow.target.task_id));
        }
        if self.creates_cycle(dataflow.source.task_id, dataflow.target.task_id) {
            return Err(GraphError::CyclicDataflow {
                source_task: dataflow.source.task_id,
                source_port: dataflow.source.port.clone(),
                target_task: dataflow.target.task_id,
                target_port: dataflow.target.port.clone(),
            });
        }
        let id = dataflow.id;
        self.dataflows.push(dataflow);
        self.events.emit(GraphEvent::DataflowAdded { dataflow_id: id });
        Ok(id)
    }

    pub fn remove_dataflow(&mut self, dataflow_id: Uuid) {
        self.dataflows.retain(|d| d.id != dataflow_id);
        self.events.emit(GraphEvent::DataflowRemoved { dataflow_id });
    }

    fn creates_cycle(&self, from: TaskId, to: TaskId) -> bool {
        if from == to {
            return true;
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(to);
        while let Some(current) = queue.pop_front() {
            if current == from {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            for df in &self.dataflows {
                if df.source.task_id == current {
                    queue.push_back(df.target.task_id);
                }
            }
        }
        false
    }

    /// Direct successors of `task_id` via outgoing dataflows.
    pub fn successors(&self, task_id: TaskId) -> impl Iterator<Item = TaskId> + '_ {
        self.dataflows
            .iter()
            .filter(move |d| d.source.task_id == task_id)
            .map(|d| d.target.task_id)
    }

    /// Direct predecessors of `task_id` via incoming dataflows.
    pub fn predecessors(&self, task_id: TaskId) -> impl Iterator<Item = TaskId> + '_ {
        self.dataflows
            .iter()
            .filter(move |d| d.target.task_id == task_id)
            .map(|d| d.source.task_id)
    }

    /// Kahn's-algorithm topological order over tasks that are not already
    /// `Disabled`. Returns `None` if a cycle is somehow present (should be
    /// unreachable given `add_dataflow`'s guard).
    pub fn topological_order(&self) -> Option<Vec<TaskId>> {
        let active: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.status != TaskStatus::Disabled)
            .map(|t| t.id())
            .collect();
        let active_set: HashSet<TaskId> = active.iter().copied().collect();

        let mut indegree: HashMap<TaskId, usize> = active.iter().map(|id| (*id, 0)).collect();
        for df in &self.dataflows {
            if active_set.contains(&df.source.task_id) && active_set.contains(&df.target.task_id) {
                *indegree.get_mut(&df.target.task_id).unwrap() += 1;
            }
        }

        let mut queue: VecDeque<TaskId> = indegree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(active.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);
            for succ in self.successors(id) {
                if !active_set.contains(&succ) {
                    continue;
                }
                let deg = indegree.get_mut(&succ).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(succ);
                }
            }
        }

        if order.len() == active.len() {
            Some(order)
        } else {
            None
        }
    }

    /// Resolve `target`'s assembled input by merging in every incoming
    /// dataflow's source output, keyed by the target port name. A target
    /// port named `"*"` (splat) merges the source's entire output object
    /// into the target's input instead of binding a single named port.
    pub fn resolve_input(&self, task_id: TaskId) -> Value {
        let mut overlay = serde_json::Map::new();
        for df in self.dataflows.iter().filter(|d| d.target.task_id == task_id) {
            let Some(source_task) = self.tasks.get(&df.source.task_id) else { continue };
            if df.target.port == "*" {
                let value = if df.source.port == "*" {
                    source_task.run_output_data.clone()
                } else {
                    source_task.run_output_data.get(&df.source.port).cloned().unwrap_or(Value::Null)
                };
                if let Value::Object(map) = value {
                    overlay.extend(map);
                }
                continue;
            }
            let value = source_task
                .run_output_data
                .get(&df.source.port)
                .cloned()
                .unwrap_or(Value::Null);
            overlay.insert(df.target.port.clone(), value);
        }
        match self.tasks.get(&task_id) {
            Some(task) => task.assemble_input(&Value::Object(overlay)),
            None => Value::Null,
        }
    }

    /// Whether `task_id` has at least one incoming dataflow already
    /// `Completed` — i.e. it is still reachable via a live path even though
    /// this cascade arrived at it via a disabled one (diamond-shaped graphs).
    fn has_live_incoming(&self, task_id: TaskId) -> bool {
        self.dataflows
            .iter()
            .any(|d| d.target.task_id == task_id && d.status == DataflowStatus::Completed)
    }

    /// Restore a single edge's status from a checkpoint (spec §4.7 resume).
    /// Matches on the `(source, target)` port pair since dataflow ids are not
    /// themselves persisted in `fluxgraph_checkpoint::DataflowState`.
    pub fn restore_dataflow_status(&mut self, source: &Port, target: &Port, status: DataflowStatus) {
        if let Some(df) = self
            .dataflows
            .iter_mut()
            .find(|d| &d.source == source && &d.target == target)
        {
            df.status = status;
        }
    }

    /// Mark every dataflow edge leaving `task_id` with `status`. Called by
    /// the scheduler alongside a task's own status transition so edges
    /// mirror PENDING/COMPLETED/DISABLED/FAILED (spec §4.1).
    pub fn mark_outgoing_dataflows(&mut self, task_id: TaskId, status: DataflowStatus) {
        for df in self.dataflows.iter_mut().filter(|d| d.source.task_id == task_id) {
            df.status = status;
        }
    }

    /// Disable-cascade (spec §4.5): propagate `DISABLED` forward through the
    /// reachable subgraph of an untaken conditional branch. A node kept alive
    /// by a different, already-`Completed` incoming edge (a diamond rejoin)
    /// is left active and the cascade does not continue past it. Only tasks
    /// still `Pending` are actually disabled; already-running or terminal
    /// tasks are left alone per the task-level invariant that `DISABLED` is
    /// reachable only from `PENDING`.
    pub fn disable_cascade(&mut self, from: TaskId) {
        let mut queue = VecDeque::new();
        queue.push_back(from);
        let mut visited = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            if self.has_live_incoming(id) {
                continue;
            }
            if let Some(task) = self.tasks.get_mut(&id) {
                task.disable();
            }
            self.mark_outgoing_dataflows(id, DataflowStatus::Disabled);
            for succ in self.successors(id).collect::<Vec<_>>() {
                queue.push_back(succ);
            }
        }
    }

    /// Serialize the graph's structural shape (tasks + dataflows), matching
    /// the teacher's `to_json`/`toDependencyJSON` parity (spec §9 supplement).
    pub fn to_json(&self) -> Value {
        let tasks: Vec<Value> = self
            .tasks
            .values()
            .map(|t| {
                serde_json::json!({
                    "id": t.id(),
                    "kind": t.def.kind,
                    "status": t.status,
                    "config": t.def.config,
                })
            })
            .collect();
        let dataflows: Vec<&Dataflow> = self.dataflows.iter().collect();
        serde_json::json!({ "id": self.id, "tasks": tasks, "dataflows": dataflows })
    }

    /// Dependency-only view: task ids plus adjacency, dropping schemas and
    /// run state. Used by the visualization module.
    pub fn to_dependency_json(&self) -> Value {
        let edges: Vec<Value> = self
            .dataflows
            .iter()
            .map(|d| serde_json::json!({"from": d.source.task_id, "to": d.target.task_id}))
            .collect();
        let nodes: Vec<Uuid> = self.tasks.keys().copied().collect();
        serde_json::json!({ "nodes": nodes, "edges": edges })
    }
}

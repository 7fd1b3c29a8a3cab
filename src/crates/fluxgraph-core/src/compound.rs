//! `GraphAsTask`: a whole sub-graph wrapped as a single task (spec §4.6).
//!
//! The sub-graph's own boundary defines its dynamic schema: tasks with no
//! incoming dataflow become entry points (their required input ports are
//! unioned into the wrapper's input schema); tasks with no outgoing dataflow
//! become exit points (their output ports are unioned into the wrapper's
//! output schema).

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use std::collections::HashMap;

use crate::dataflow::TaskGraph;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::schema;
use crate::task::{ExecuteContext, TaskExecutor, TaskId};

/// How a compound task's ending-node outputs combine into the wrapper's
/// single result object when more than one ending node shares the maximum
/// depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundMerge {
    /// Later ending nodes (graph iteration order) overwrite earlier ones for
    /// a shared property name.
    PropertyFirst,
    /// A shared property name is lifted into an array collecting every
    /// ending node's value for it, in graph iteration order.
    PropertyArray,
}

/// Wraps an owned [`TaskGraph`] as a single [`TaskExecutor`]. Runs the whole
/// sub-graph to completion on each `execute`, seeding entry-task inputs from
/// the wrapper's resolved input and collecting the outputs of the
/// **deepest** ending nodes into the wrapper's result object.
pub struct GraphAsTaskExecutor {
    sub_graph: Mutex<TaskGraph>,
    scheduler_config: SchedulerConfig,
    compound_merge: CompoundMerge,
}

impl GraphAsTaskExecutor {
    pub fn new(sub_graph: TaskGraph, scheduler_config: SchedulerConfig) -> Self {
        Self { sub_graph: Mutex::new(sub_graph), scheduler_config, compound_merge: CompoundMerge::PropertyFirst }
    }

    pub fn with_compound_merge(mut self, merge: CompoundMerge) -> Self {
        self.compound_merge = merge;
        self
    }

    fn entry_tasks(graph: &TaskGraph) -> Vec<TaskId> {
        graph
            .tasks()
            .filter(|t| graph.predecessors(t.id()).next().is_none())
            .map(|t| t.id())
            .collect()
    }

    /// Longest path (in edges) from any entry task to each task, computed by
    /// relaxing over a topological order. Entry tasks themselves sit at
    /// depth 0.
    fn depths(graph: &TaskGraph) -> HashMap<TaskId, usize> {
        let mut depths: HashMap<TaskId, usize> = HashMap::new();
        for id in Self::entry_tasks(graph) {
            depths.insert(id, 0);
        }
        // The sub-graph is a DAG; a fixed-point relaxation pass bounded by
        // the task count always converges without needing a separate
        // topological sort helper.
        let task_count = graph.tasks().count();
        for _ in 0..=task_count {
            let mut changed = false;
            for task in graph.tasks() {
                let id = task.id();
                for pred in graph.predecessors(id) {
                    if let Some(&pred_depth) = depths.get(&pred) {
                        let candidate = pred_depth + 1;
                        let entry = depths.entry(id).or_insert(candidate);
                        if candidate > *entry {
                            *entry = candidate;
                            changed = true;
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }
        depths
    }

    /// Ending nodes (zero out-degree) restricted to those at the sub-graph's
    /// maximum depth, per spec: when several ending nodes tie for deepest,
    /// every one of them contributes to the output.
    fn exit_tasks(graph: &TaskGraph) -> Vec<TaskId> {
        let depths = Self::depths(graph);
        let ending: Vec<TaskId> =
            graph.tasks().filter(|t| graph.successors(t.id()).next().is_none()).map(|t| t.id()).collect();
        let max_depth = ending.iter().filter_map(|id| depths.get(id)).max().copied().unwrap_or(0);
        ending.into_iter().filter(|id| depths.get(id).copied().unwrap_or(0) == max_depth).collect()
    }

    /// Synthesize `(input_schema, output_schema)` from the sub-graph's
    /// boundary tasks, for registration as this wrapper's own schemas.
    pub fn synthesize_schema(sub_graph: &TaskGraph) -> (Value, Value) {
        let mut input_props = serde_json::Map::new();
        let mut required = Vec::new();
        for id in Self::entry_tasks(sub_graph) {
            let Some(task) = sub_graph.task(id) else { continue };
            if let Some(props) = schema::properties(&task.def.input_schema) {
                for (name, port_schema) in props {
                    if schema::is_required(&task.def.input_schema, &name) {
                        required.push(name.clone());
                    }
                    input_props.insert(name, port_schema);
                }
            }
        }
        let exits = Self::exit_tasks(sub_graph);
        let lift_to_array = exits.len() > 1;
        let mut output_props = serde_json::Map::new();
        for id in exits {
            let Some(task) = sub_graph.task(id) else { continue };
            if let Some(props) = schema::properties(&task.def.output_schema) {
                for (name, port_schema) in props {
                    if lift_to_array {
                        output_props.insert(name, serde_json::json!({"type": "array", "items": port_schema}));
                    } else {
                        output_props.insert(name, port_schema);
                    }
                }
            }
        }
        let input_schema = serde_json::json!({"properties": input_props, "required": required});
        let output_schema = serde_json::json!({"properties": output_props});
        (input_schema, output_schema)
    }
}

#[async_trait]
impl TaskExecutor for GraphAsTaskExecutor {
    async fn execute(&self, input: Value, ctx: &ExecuteContext) -> std::result::Result<Value, String> {
        let mut graph = self.sub_graph.lock();
        for id in Self::entry_tasks(&graph) {
            if let Some(task) = graph.task_mut(id) {
                task.run_input_data = crate::task::merge_json(task.run_input_data.clone(), input.clone());
            }
        }

        let scheduler = Scheduler::new(self.scheduler_config.clone()).with_registry(ctx.registry.clone());
        let report = scheduler.run(&mut graph).await.map_err(|e| e.to_string())?;
        if let Some((_, message)) = report.failed.first() {
            return Err(message.clone());
        }

        let exits = Self::exit_tasks(&graph);
        let mut output = serde_json::Map::new();
        for id in exits {
            let Some(task) = graph.task(id) else { continue };
            let Value::Object(map) = &task.run_output_data else { continue };
            match self.compound_merge {
                CompoundMerge::PropertyFirst => output.extend(map.clone()),
                CompoundMerge::PropertyArray => {
                    for (key, value) in map {
                        output
                            .entry(key.clone())
                            .or_insert_with(|| Value::Array(Vec::new()))
                            .as_array_mut()
                            .expect("compound output accumulator is always an array")
                            .push(value.clone());
                    }
                }
            }
        }
        Ok(Value::Object(output))
    }
}

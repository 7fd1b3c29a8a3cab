//! Iterator constructs: `MapTask`, `ReduceTask`, `WhileTask` (spec §4.6).
//!
//! Each construct instantiates a fresh body sub-graph per iteration via a
//! factory closure rather than sharing one mutable sub-graph instance, since
//! iterations of `Map` run concurrently and each needs its own run state.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use crate::conditional::Condition;
use crate::dataflow::TaskGraph;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::task::{ExecuteContext, TaskExecutor, TaskId};

pub type BodyFactory = Arc<dyn Fn() -> TaskGraph + Send + Sync>;

fn entry_task(graph: &TaskGraph) -> Option<TaskId> {
    graph.tasks().find(|t| graph.predecessors(t.id()).next().is_none()).map(|t| t.id())
}

fn exit_task(graph: &TaskGraph) -> Option<TaskId> {
    graph.tasks().find(|t| graph.successors(t.id()).next().is_none()).map(|t| t.id())
}

async fn run_body_once(body: &BodyFactory, input: Value) -> Result<Value, String> {
    let mut graph = (body)();
    let entry = entry_task(&graph).ok_or("iterator body has no entry task")?;
    if let Some(task) = graph.task_mut(entry) {
        task.run_input_data = input;
    }
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let report = scheduler.run(&mut graph).await.map_err(|e| e.to_string())?;
    if let Some((_, message)) = report.failed.first() {
        return Err(message.clone());
    }
    let exit = exit_task(&graph).ok_or("iterator body has no exit task")?;
    Ok(graph.task(exit).map(|t| t.run_output_data.clone()).unwrap_or(Value::Null))
}

/// Runs `body` once per element of the input array (port `items`), bounded
/// by `concurrency` concurrent iterations within a batch, and collects
/// results into an array.
///
/// - `batch_size`: when set, items run in sequential batches of this size
///   (each batch still concurrent up to `concurrency`) rather than all at
///   once — useful for rate-limited bodies.
/// - `preserve_order`: `true` keeps output order matching input order
///   (`buffered`); `false` yields results as they complete (`buffer_unordered`),
///   trading order for lower tail latency.
/// - `flatten`: when a body invocation itself returns an array, splice its
///   elements into the result instead of nesting it one level deep.
pub struct MapExecutor {
    pub body: BodyFactory,
    pub items_port: String,
    pub concurrency: usize,
    pub batch_size: Option<usize>,
    pub preserve_order: bool,
    pub flatten: bool,
}

#[async_trait]
impl TaskExecutor for MapExecutor {
    async fn execute(&self, input: Value, _ctx: &ExecuteContext) -> std::result::Result<Value, String> {
        let items = input
            .get(&self.items_port)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| format!("map input port '{}' is not an array", self.items_port))?;

        let batches: Vec<Vec<Value>> = match self.batch_size {
            Some(n) if n > 0 => items.chunks(n).map(<[Value]>::to_vec).collect(),
            _ => vec![items],
        };

        let mut results: Vec<Result<Value, String>> = Vec::new();
        for batch in batches {
            let body = self.body.clone();
            let concurrency = self.concurrency.max(1);
            let batch_results: Vec<Result<Value, String>> = if self.preserve_order {
                stream::iter(batch)
                    .map(move |item| {
                        let body = body.clone();
                        async move { run_body_once(&body, item).await }
                    })
                    .buffered(concurrency)
                    .collect()
                    .await
            } else {
                stream::iter(batch)
                    .map(move |item| {
                        let body = body.clone();
                        async move { run_body_once(&body, item).await }
                    })
                    .buffer_unordered(concurrency)
                    .collect()
                    .await
            };
            results.extend(batch_results);
        }

        let mut out = Vec::with_capacity(results.len());
        for result in results {
            let value = result?;
            if self.flatten {
                if let Value::Array(items) = value {
                    out.extend(items);
                    continue;
                }
            }
            out.push(value);
        }
        Ok(Value::Array(out))
    }
}

/// Folds `body` over the input array sequentially (port `items`), seeded by
/// `initial`, threading an accumulator value (port `acc`) through each
/// iteration's input and taking the body's exit output as the next
/// accumulator.
pub struct ReduceExecutor {
    pub body: BodyFactory,
    pub items_port: String,
    pub acc_port: String,
    pub item_port: String,
    pub initial: Value,
}

#[async_trait]
impl TaskExecutor for ReduceExecutor {
    async fn execute(&self, input: Value, _ctx: &ExecuteContext) -> std::result::Result<Value, String> {
        let items = input
            .get(&self.items_port)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| format!("reduce input port '{}' is not an array", self.items_port))?;

        let mut acc = self.initial.clone();
        for item in items {
            let body_input = serde_json::json!({
                self.acc_port.clone(): acc,
                self.item_port.clone(): item,
            });
            acc = run_body_once(&self.body, body_input).await?;
        }
        Ok(serde_json::json!({ self.acc_port.clone(): acc }))
    }
}

/// Repeatedly runs `body`, feeding each iteration's output back in as the
/// next iteration's input (the whole state threads through, not a single
/// port). Stops gracefully — never an error — as soon as `condition`
/// evaluates false against the current state and iteration index, or
/// `iterationIndex >= max_iterations`, whichever comes first (spec §4.6).
/// The returned state carries a `_iterations` field counting completed
/// iterations.
pub struct WhileExecutor {
    pub body: BodyFactory,
    pub condition: Condition,
    pub max_iterations: u32,
}

#[async_trait]
impl TaskExecutor for WhileExecutor {
    async fn execute(&self, input: Value, _ctx: &ExecuteContext) -> std::result::Result<Value, String> {
        let mut state = input;
        let mut iterations = 0u32;
        while iterations < self.max_iterations && self.condition.evaluate_with_index(&state, iterations) {
            state = run_body_once(&self.body, state).await?;
            iterations += 1;
        }
        Ok(with_iteration_count(state, iterations))
    }
}

/// Stamp the completed iteration count onto a `while` loop's final state.
fn with_iteration_count(state: Value, iterations: u32) -> Value {
    match state {
        Value::Object(mut map) => {
            map.insert("_iterations".to_string(), Value::from(iterations));
            Value::Object(map)
        }
        other => serde_json::json!({ "value": other, "_iterations": iterations }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::{Dataflow, Port};
    use crate::task::{Task, TaskConfig, TaskDef};
    use serde_json::json;

    struct Double;
    #[async_trait]
    impl TaskExecutor for Double {
        async fn execute(&self, input: Value, _ctx: &ExecuteContext) -> std::result::Result<Value, String> {
            Ok(json!({ "value": input["value"].as_i64().unwrap_or(0) * 2 }))
        }
    }

    fn single_task_body() -> TaskGraph {
        let mut graph = TaskGraph::new();
        graph
            .add_task(Task::new(TaskDef {
                kind: "double".into(),
                config: TaskConfig::new("double"),
                defaults: json!({}),
                input_schema: json!({"properties": {"value": {"type": "integer"}}}),
                output_schema: json!({"properties": {"value": {"type": "integer"}}}),
                executor: Arc::new(Double),
                retry_policy: None,
                sub_graph: None,
            }))
            .unwrap();
        graph
    }

    fn registry() -> Arc<crate::registry::ServiceRegistry> {
        Arc::new(crate::registry::ServiceRegistry::default())
    }

    fn ctx() -> ExecuteContext {
        ExecuteContext::new(uuid::Uuid::new_v4(), Default::default(), Default::default(), registry())
    }

    fn map_executor() -> MapExecutor {
        MapExecutor {
            body: Arc::new(single_task_body),
            items_port: "items".into(),
            concurrency: 2,
            batch_size: None,
            preserve_order: true,
            flatten: false,
        }
    }

    #[tokio::test]
    async fn map_preserves_order() {
        let executor = map_executor();
        let out = executor
            .execute(json!({"items": [{"value": 1}, {"value": 2}, {"value": 3}]}), &ctx())
            .await
            .unwrap();
        assert_eq!(out, json!([{"value": 2}, {"value": 4}, {"value": 6}]));
    }

    #[tokio::test]
    async fn map_batches_sequentially_but_runs_all_items() {
        let executor = MapExecutor { batch_size: Some(2), ..map_executor() };
        let out = executor
            .execute(json!({"items": [{"value": 1}, {"value": 2}, {"value": 3}, {"value": 4}]}), &ctx())
            .await
            .unwrap();
        assert_eq!(out, json!([{"value": 2}, {"value": 4}, {"value": 6}, {"value": 8}]));
    }

    #[tokio::test]
    async fn map_flatten_splices_array_bodies_one_level() {
        struct Pair;
        #[async_trait]
        impl TaskExecutor for Pair {
            async fn execute(&self, input: Value, _ctx: &ExecuteContext) -> std::result::Result<Value, String> {
                let v = input["value"].as_i64().unwrap_or(0);
                Ok(json!([v, v * 10]))
            }
        }
        fn pair_body() -> TaskGraph {
            let mut graph = TaskGraph::new();
            graph
                .add_task(Task::new(TaskDef {
                    kind: "pair".into(),
                    config: TaskConfig::new("pair"),
                    defaults: json!({}),
                    input_schema: json!({"properties": {"value": {"type": "integer"}}}),
                    output_schema: json!({}),
                    executor: Arc::new(Pair),
                    retry_policy: None,
                    sub_graph: None,
                }))
                .unwrap();
            graph
        }
        let executor = MapExecutor { body: Arc::new(pair_body), flatten: true, ..map_executor() };
        let out = executor.execute(json!({"items": [{"value": 1}, {"value": 2}]}), &ctx()).await.unwrap();
        assert_eq!(out, json!([1, 10, 2, 20]));
    }

    #[tokio::test]
    async fn reduce_folds_sequentially() {
        let executor = ReduceExecutor {
            body: Arc::new(single_task_body),
            items_port: "items".into(),
            acc_port: "value".into(),
            item_port: "item".into(),
            initial: json!(1),
        };
        let out = executor
            .execute(json!({"items": [{}, {}]}), &ctx())
            .await
            .unwrap();
        assert_eq!(out["value"], json!(4));
    }

    #[tokio::test]
    async fn while_loop_stops_on_condition() {
        let executor = WhileExecutor {
            body: Arc::new(single_task_body),
            condition: Condition::Lt {
                path: "value".into(),
                value: json!(10),
            },
            max_iterations: 10,
        };
        let out = executor.execute(json!({"value": 1}), &ctx()).await.unwrap();
        assert_eq!(out["value"], json!(16));
        assert_eq!(out["_iterations"], json!(3));
    }

    #[tokio::test]
    async fn while_loop_stops_gracefully_at_max_iterations_instead_of_erroring() {
        let executor = WhileExecutor {
            body: Arc::new(single_task_body),
            condition: Condition::Lt { path: "value".into(), value: json!(1000) },
            max_iterations: 2,
        };
        let out = executor.execute(json!({"value": 1}), &ctx()).await.unwrap();
        assert_eq!(out["_iterations"], json!(2));
        assert_eq!(out["value"], json!(4));
    }

    #[tokio::test]
    async fn while_condition_can_see_the_iteration_index() {
        let executor = WhileExecutor {
            body: Arc::new(single_task_body),
            // Mirrors the spec's `(o,i)=>o.quality<0.9 && i<10`-shaped
            // condition: stop once either the state or the index says so.
            condition: Condition::IndexedFunction(Arc::new(|state: &Value, index: u32| {
                state["value"].as_i64().unwrap_or(0) < 100 && index < 2
            })),
            max_iterations: 10,
        };
        let out = executor.execute(json!({"value": 1}), &ctx()).await.unwrap();
        assert_eq!(out["_iterations"], json!(2));
    }
}

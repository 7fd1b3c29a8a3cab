//! Literal end-to-end scenarios from the task-graph specification's testable
//! properties.

use std::sync::Arc;

use async_trait::async_trait;
use fluxgraph_core::{
    Branch, Condition, ConditionalExecutor, Dataflow, Port, Scheduler, SchedulerConfig, Task,
    TaskConfig, TaskDef, TaskExecutor, TaskGraph, TaskStatus,
};
use serde_json::{json, Value};

struct NumberToString;
#[async_trait]
impl TaskExecutor for NumberToString {
    async fn execute(&self, input: Value, _ctx: &fluxgraph_core::ExecuteContext) -> Result<Value, String> {
        let n = input["input"].as_i64().ok_or("missing input")?;
        Ok(json!({ "text": n.to_string() }))
    }
}

struct Identity;
#[async_trait]
impl TaskExecutor for Identity {
    async fn execute(&self, input: Value, _ctx: &fluxgraph_core::ExecuteContext) -> Result<Value, String> {
        Ok(input)
    }
}

struct Double;
#[async_trait]
impl TaskExecutor for Double {
    async fn execute(&self, input: Value, _ctx: &fluxgraph_core::ExecuteContext) -> Result<Value, String> {
        Ok(json!({ "doubled": input["value"].as_i64().unwrap_or(0) * 2 }))
    }
}

struct Halve;
#[async_trait]
impl TaskExecutor for Halve {
    async fn execute(&self, input: Value, _ctx: &fluxgraph_core::ExecuteContext) -> Result<Value, String> {
        Ok(json!({ "halved": input["value"].as_i64().unwrap_or(0) / 2 }))
    }
}

struct SimpleProcessing;
#[async_trait]
impl TaskExecutor for SimpleProcessing {
    async fn execute(&self, input: Value, _ctx: &fluxgraph_core::ExecuteContext) -> Result<Value, String> {
        let text = input["text"].as_str().ok_or("missing text")?;
        Ok(json!({ "output": format!("Processed: {text}") }))
    }
}

fn task(kind: &str, executor: Arc<dyn TaskExecutor>, input_schema: Value, output_schema: Value) -> Task {
    Task::new(TaskDef {
        kind: kind.to_string(),
        config: TaskConfig::new(kind),
        defaults: json!({}),
        input_schema,
        output_schema,
        executor,
        retry_policy: None,
        sub_graph: None,
    })
}

#[tokio::test]
async fn linear_pipeline_number_to_string_to_processing() {
    let mut graph = TaskGraph::new();
    let number = task(
        "number",
        Arc::new(Identity),
        json!({}),
        json!({"properties": {"input": {"type": "integer"}}}),
    );
    let number_id = graph.add_task(number).unwrap();
    graph.task_mut(number_id).unwrap().run_input_data = json!({"input": 5});

    let n2s = task(
        "number_to_string",
        Arc::new(NumberToString),
        json!({"properties": {"input": {"type": "integer"}}, "required": ["input"]}),
        json!({"properties": {"text": {"type": "string"}}}),
    );
    let n2s_id = graph.add_task(n2s).unwrap();

    let processing = task(
        "simple_processing",
        Arc::new(SimpleProcessing),
        json!({"properties": {"text": {"type": "string"}}, "required": ["text"]}),
        json!({"properties": {"output": {"type": "string"}}}),
    );
    let processing_id = graph.add_task(processing).unwrap();

    graph.add_dataflow(Dataflow::new(Port::new(number_id, "input"), Port::new(n2s_id, "input"))).unwrap();
    graph.add_dataflow(Dataflow::new(Port::new(n2s_id, "text"), Port::new(processing_id, "text"))).unwrap();

    let scheduler = Scheduler::new(SchedulerConfig::default());
    let report = scheduler.run(&mut graph).await.unwrap();
    assert!(report.failed.is_empty());

    let final_output = &graph.task(processing_id).unwrap().run_output_data;
    assert_eq!(final_output["output"], json!("Processed: 5"));
}

#[tokio::test]
async fn conditional_routing_disables_the_untaken_branch() {
    let mut graph = TaskGraph::new();

    let double = task(
        "double",
        Arc::new(Double),
        json!({"properties": {"value": {"type": "integer"}}}),
        json!({"properties": {"doubled": {"type": "integer"}}}),
    );
    let double_id = graph.add_task(double).unwrap();

    let halve = task(
        "halve",
        Arc::new(Halve),
        json!({"properties": {"value": {"type": "integer"}}}),
        json!({"properties": {"halved": {"type": "integer"}}}),
    );
    let halve_id = graph.add_task(halve).unwrap();

    let branches = vec![
        Branch {
            id: "high".into(),
            condition: Condition::Gt { path: "value".into(), value: json!(5) },
            target: double_id,
            output_port: "high_out".into(),
        },
        Branch {
            id: "low".into(),
            condition: Condition::Lte { path: "value".into(), value: json!(5) },
            target: halve_id,
            output_port: "low_out".into(),
        },
    ];
    let conditional = task(
        "conditional",
        Arc::new(ConditionalExecutor { branches, default_branch: None, exclusive: true }),
        json!({"properties": {"value": {"type": "integer"}}}),
        json!({}),
    );
    let conditional_id = graph.add_task(conditional).unwrap();
    graph.task_mut(conditional_id).unwrap().run_input_data = json!({"value": 10});

    // The conditional writes `{"value": 10}` under its selected branch's
    // output port; splat it onto the downstream task's own top-level input.
    graph
        .add_dataflow(Dataflow::new(Port::new(conditional_id, "high_out"), Port::new(double_id, "*")))
        .unwrap();
    graph
        .add_dataflow(Dataflow::new(Port::new(conditional_id, "low_out"), Port::new(halve_id, "*")))
        .unwrap();

    let scheduler = Scheduler::new(SchedulerConfig::default());
    let report = scheduler.run(&mut graph).await.unwrap();
    assert!(report.failed.is_empty());

    assert_eq!(graph.task(double_id).unwrap().status, TaskStatus::Completed);
    assert_eq!(graph.task(double_id).unwrap().run_output_data["doubled"], json!(20));
    assert_eq!(graph.task(halve_id).unwrap().status, TaskStatus::Disabled);
}

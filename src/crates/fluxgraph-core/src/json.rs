//! Graph (de)serialization: a portable JSON/YAML document shape for a task
//! graph's structure (spec §4.6 workflow definitions, §9 supplement parity
//! with `toDependencyJSON`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dataflow::{Dataflow, Port, TaskGraph};
use crate::error::{GraphError, Result};
use crate::registry::TaskRegistry;
use crate::task::{Task, TaskConfig, TaskDef};

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
    #[serde(default)]
    pub cacheable: bool,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DataflowItem {
    pub source_task: Uuid,
    pub source_port: String,
    pub target_task: Uuid,
    pub target_port: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GraphDocument {
    pub tasks: Vec<TaskItem>,
    pub dataflows: Vec<DataflowItem>,
}

/// Instantiate a [`TaskGraph`] from a parsed document, resolving each task's
/// `type` against `registry`. Fails with [`GraphError::UnknownTaskKind`] for
/// any `type` the registry has no factory for.
pub fn from_document(document: GraphDocument, registry: &TaskRegistry) -> Result<TaskGraph> {
    let mut graph = TaskGraph::new();
    for item in document.tasks {
        let info = registry.get(&item.kind)?;
        let mut config = TaskConfig::new(item.title.unwrap_or_else(|| item.kind.clone()));
        config.id = item.id;
        config.cacheable = item.cacheable;
        config.extras = item.config;
        let task = Task::new(TaskDef {
            kind: item.kind,
            config,
            defaults: Value::Null,
            input_schema: info.input_schema,
            output_schema: info.output_schema,
            executor: (info.factory)(),
            retry_policy: None,
            sub_graph: None,
        });
        graph.add_task(task)?;
    }
    for df in document.dataflows {
        graph.add_dataflow(Dataflow::new(
            Port::new(df.source_task, df.source_port),
            Port::new(df.target_task, df.target_port),
        ))?;
    }
    Ok(graph)
}

pub fn from_json(json: &str, registry: &TaskRegistry) -> Result<TaskGraph> {
    let document: GraphDocument = serde_json::from_str(json)?;
    from_document(document, registry)
}

pub fn from_yaml(yaml: &str, registry: &TaskRegistry) -> Result<TaskGraph> {
    let document: GraphDocument = serde_yaml::from_str(yaml)?;
    from_document(document, registry)
}

pub fn to_document(graph: &TaskGraph) -> GraphDocument {
    let tasks = graph
        .tasks()
        .map(|t| TaskItem {
            id: t.id(),
            kind: t.def.kind.clone(),
            title: t.def.config.title.clone(),
            cacheable: t.def.config.cacheable,
            config: t.def.config.extras.clone(),
        })
        .collect();
    let dataflows = graph
        .dataflows()
        .iter()
        .map(|d| DataflowItem {
            source_task: d.source.task_id,
            source_port: d.source.port.clone(),
            target_task: d.target.task_id,
            target_port: d.target.port.clone(),
        })
        .collect();
    GraphDocument { tasks, dataflows }
}

pub fn to_json(graph: &TaskGraph) -> Result<String> {
    Ok(serde_json::to_string_pretty(&to_document(graph))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ExecuteContext;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct Identity;
    #[async_trait]
    impl crate::task::TaskExecutor for Identity {
        async fn execute(&self, input: Value, _ctx: &ExecuteContext) -> std::result::Result<Value, String> {
            Ok(input)
        }
    }

    #[test]
    fn unknown_kind_rejected() {
        let registry = TaskRegistry::new();
        let document = GraphDocument {
            tasks: vec![TaskItem {
                id: Uuid::new_v4(),
                kind: "ghost".into(),
                title: None,
                cacheable: false,
                config: Value::Null,
            }],
            dataflows: vec![],
        };
        let result = from_document(document, &registry);
        assert!(matches!(result, Err(GraphError::UnknownTaskKind(_))));
    }

    #[test]
    fn roundtrip_preserves_task_and_dataflow_shape() {
        let registry = TaskRegistry::new();
        registry.register("identity", json!({}), json!({}), || Arc::new(Identity));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let document = GraphDocument {
            tasks: vec![
                TaskItem { id: a, kind: "identity".into(), title: Some("a".into()), cacheable: false, config: Value::Null },
                TaskItem { id: b, kind: "identity".into(), title: Some("b".into()), cacheable: false, config: Value::Null },
            ],
            dataflows: vec![DataflowItem {
                source_task: a,
                source_port: "out".into(),
                target_task: b,
                target_port: "in".into(),
            }],
        };
        let graph = from_document(document, &registry).unwrap();
        assert_eq!(graph.dataflows().len(), 1);
        let back = to_document(&graph);
        assert_eq!(back.tasks.len(), 2);
        assert_eq!(back.dataflows.len(), 1);
    }
}

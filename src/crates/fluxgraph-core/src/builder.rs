//! Fluent workflow builder with schema-driven auto-connection (spec §4.6).

use std::sync::Arc;

use serde_json::Value;

use crate::dataflow::{Dataflow, Port, TaskGraph};
use crate::error::{GraphError, Result};
use crate::registry::TaskRegistry;
use crate::schema;
use crate::task::{Task, TaskConfig, TaskDef, TaskId};

/// Builds a [`TaskGraph`] by adding task kinds one at a time and either
/// explicitly wiring dataflows or letting the builder auto-connect required
/// inputs against prior tasks' outputs.
pub struct WorkflowBuilder {
    registry: TaskRegistry,
    graph: TaskGraph,
    order: Vec<TaskId>,
}

impl WorkflowBuilder {
    pub fn new(registry: TaskRegistry) -> Self {
        Self { registry, graph: TaskGraph::new(), order: Vec::new() }
    }

    /// Instantiate `kind` as a new task, auto-connecting every required
    /// input port that isn't explicitly provided in `overrides` against the
    /// most recently added task whose output satisfies one of the matching
    /// rules below (spec §4.6):
    ///
    /// 1. exact port name match,
    /// 2. a primitive-typed input matching an upstream task's sole primitive
    ///    output (the "primitive output -> primitive input" convention),
    /// 3. a shared `format` tag, traversing `oneOf`/`anyOf` wrappers.
    ///
    /// Fails with [`GraphError::AutoConnectFailed`] if a required port finds
    /// no match and no override was given.
    pub fn add_task(&mut self, kind: &str, title: &str, overrides: Value) -> Result<TaskId> {
        let info = self.registry.get(kind)?;
        let config = TaskConfig::new(title);
        let task_id = config.id;

        let task = Task::new(TaskDef {
            kind: kind.to_string(),
            config,
            defaults: overrides.clone(),
            input_schema: info.input_schema.clone(),
            output_schema: info.output_schema.clone(),
            executor: (info.factory)(),
            retry_policy: None,
            sub_graph: None,
        });
        self.graph.add_task(task)?;

        let override_keys: Vec<String> = overrides
            .as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();

        if let Some(props) = schema::properties(&info.input_schema) {
            for (port_name, port_schema) in &props {
                if !schema::is_required(&info.input_schema, port_name) {
                    continue;
                }
                if override_keys.contains(port_name) {
                    continue;
                }
                match self.find_auto_connect_source(port_name, port_schema) {
                    Some(source) => {
                        self.graph.add_dataflow(Dataflow::new(source, Port::new(task_id, port_name.clone())))?;
                    }
                    None if self.order.is_empty() => {
                        // The first task in the graph has nothing upstream
                        // to auto-connect against; its required input is an
                        // entry port the graph expects to receive externally.
                    }
                    None => {
                        return Err(GraphError::AutoConnectFailed {
                            kind: kind.to_string(),
                            port: port_name.clone(),
                        });
                    }
                }
            }
        }

        self.order.push(task_id);
        Ok(task_id)
    }

    /// Explicitly wire `source_port` on `source` to `target_port` on `target`,
    /// overriding anything auto-connection would have chosen.
    pub fn connect(
        &mut self,
        source: TaskId,
        source_port: &str,
        target: TaskId,
        target_port: &str,
    ) -> Result<()> {
        self.graph
            .add_dataflow(Dataflow::new(Port::new(source, source_port), Port::new(target, target_port)))?;
        Ok(())
    }

    fn find_auto_connect_source(&self, port_name: &str, port_schema: &Value) -> Option<Port> {
        for &candidate in self.order.iter().rev() {
            let task = self.graph.task(candidate)?;
            let Some(out_props) = schema::properties(&task.def.output_schema) else {
                continue;
            };

            // Rule 1: exact name match.
            if out_props.contains_key(port_name) {
                return Some(Port::new(candidate, port_name.to_string()));
            }

            // Rule 2: primitive output -> primitive input convention, only
            // when the upstream task has exactly one primitive output port.
            if schema::type_tag(port_schema) == schema::TypeTag::Primitive {
                let primitive_outputs: Vec<&String> = out_props
                    .iter()
                    .filter(|(_, schema)| schema::type_tag(schema) == schema::TypeTag::Primitive)
                    .map(|(name, _)| name)
                    .collect();
                if primitive_outputs.len() == 1 {
                    return Some(Port::new(candidate, primitive_outputs[0].clone()));
                }
            }

            // Rule 3: shared `format` tag.
            if let Some(want_format) = schema::format(port_schema) {
                for (out_name, out_schema) in &out_props {
                    if schema::format(out_schema).as_deref() == Some(want_format.as_str()) {
                        return Some(Port::new(candidate, out_name.clone()));
                    }
                }
            }
        }
        None
    }

    pub fn build(self) -> TaskGraph {
        self.graph
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }
}

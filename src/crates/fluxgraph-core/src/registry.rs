//! Task kind registry and service registry (spec §4.3/§4.9).
//!
//! `TaskRegistry` maps a task kind name to a factory that produces a fresh
//! [`crate::task::TaskExecutor`] plus its declared schemas — used both by
//! the workflow builder (to instantiate tasks by kind) and by JSON
//! deserialization (`UnknownTaskKind`).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{GraphError, Result};
use crate::task::TaskExecutor;

/// What the registry knows about one task kind.
#[derive(Clone)]
pub struct TaskKindInfo {
    pub input_schema: Value,
    pub output_schema: Value,
    pub factory: Arc<dyn Fn() -> Arc<dyn TaskExecutor> + Send + Sync>,
}

/// Maps task kind name -> factory + schemas. Cloning is cheap (shares the
/// underlying map via `Arc`).
#[derive(Clone, Default)]
pub struct TaskRegistry {
    kinds: Arc<parking_lot::RwLock<HashMap<String, TaskKindInfo>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        kind: impl Into<String>,
        input_schema: Value,
        output_schema: Value,
        factory: impl Fn() -> Arc<dyn TaskExecutor> + Send + Sync + 'static,
    ) {
        self.kinds.write().insert(
            kind.into(),
            TaskKindInfo {
                input_schema,
                output_schema,
                factory: Arc::new(factory),
            },
        );
    }

    pub fn get(&self, kind: &str) -> Result<TaskKindInfo> {
        self.kinds
            .read()
            .get(kind)
            .cloned()
            .ok_or_else(|| GraphError::UnknownTaskKind(kind.to_string()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.read().contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        self.kinds.read().keys().cloned().collect()
    }
}

/// Ambient services a task's `execute` can reach through `ExecuteContext`
/// (e.g. an LLM client, a database handle) without threading them through
/// every call signature. Keyed by `TypeId` — `insert::<T>`/`get::<T>`.
#[derive(Default, Clone)]
pub struct ServiceRegistry {
    services: Arc<parking_lot::RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&self, value: T) {
        self.services.write().insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .read()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }
}

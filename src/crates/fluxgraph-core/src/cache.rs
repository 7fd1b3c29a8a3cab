//! Fingerprint-keyed output cache (spec §4.4).
//!
//! Pluggable via the [`OutputCache`] trait so a host application can swap in
//! a persistent cache; [`InMemoryOutputCache`] is the default bundled here,
//! grounded on the teacher's `langgraph-checkpoint::memory` storage shape
//! (an `Arc<RwLock<HashMap<..>>>`).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// A cache keyed by `(task kind, fingerprint)`. Implementors must be safe to
/// share across concurrently-running tasks.
pub trait OutputCache: Send + Sync {
    fn get(&self, kind: &str, fingerprint: &str) -> Option<Value>;
    fn put(&self, kind: &str, fingerprint: &str, output: Value);
    fn invalidate(&self, kind: &str, fingerprint: &str);
    fn clear(&self);
}

#[derive(Default)]
pub struct InMemoryOutputCache {
    entries: RwLock<HashMap<(String, String), Value>>,
}

impl InMemoryOutputCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl OutputCache for InMemoryOutputCache {
    fn get(&self, kind: &str, fingerprint: &str) -> Option<Value> {
        self.entries.read().get(&(kind.to_string(), fingerprint.to_string())).cloned()
    }

    fn put(&self, kind: &str, fingerprint: &str, output: Value) {
        self.entries.write().insert((kind.to_string(), fingerprint.to_string()), output);
    }

    fn invalidate(&self, kind: &str, fingerprint: &str) {
        self.entries.write().remove(&(kind.to_string(), fingerprint.to_string()));
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}

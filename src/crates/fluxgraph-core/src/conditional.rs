//! Conditional branch routing: declarative conditions and the evaluator
//! behind `ConditionalTask` (spec §4.6).
//!
//! When `exclusive` is true, a `ConditionalTask` evaluates its branches in
//! order and selects the first whose condition is true (falling back to
//! `default_branch` if none match); when `exclusive` is false, every branch
//! whose condition is true stays active simultaneously. The executor's
//! output carries `activeBranches` (the selected branch ids) and
//! `branchTargets` (every branch id mapped to its downstream task id) so the
//! scheduler can disable-cascade every branch target not in `activeBranches`
//! without this module reaching into the graph itself — see
//! [`crate::dataflow::TaskGraph::disable_cascade`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GraphError;
use crate::task::{ExecuteContext, TaskExecutor, TaskId};

/// Declarative predicate evaluated against a JSON state value. `path` is a
/// dot-separated pointer into the state object (e.g. `"user.age"`).
#[derive(Clone)]
pub enum Condition {
    Eq { path: String, value: Value },
    Ne { path: String, value: Value },
    Gt { path: String, value: Value },
    Lt { path: String, value: Value },
    Gte { path: String, value: Value },
    Lte { path: String, value: Value },
    Exists { path: String },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    /// Escape hatch for predicates declarative conditions can't express.
    Function(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
    /// Like [`Condition::Function`] but also sees the current loop iteration
    /// index, for predicates like `(o,i)=>o.quality<0.9 && i<10` (spec §4.6).
    IndexedFunction(Arc<dyn Fn(&Value, u32) -> bool + Send + Sync>),
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Eq { path, value } => f.debug_struct("Eq").field("path", path).field("value", value).finish(),
            Condition::Ne { path, value } => f.debug_struct("Ne").field("path", path).field("value", value).finish(),
            Condition::Gt { path, value } => f.debug_struct("Gt").field("path", path).field("value", value).finish(),
            Condition::Lt { path, value } => f.debug_struct("Lt").field("path", path).field("value", value).finish(),
            Condition::Gte { path, value } => f.debug_struct("Gte").field("path", path).field("value", value).finish(),
            Condition::Lte { path, value } => f.debug_struct("Lte").field("path", path).field("value", value).finish(),
            Condition::Exists { path } => f.debug_struct("Exists").field("path", path).finish(),
            Condition::And(conds) => f.debug_tuple("And").field(conds).finish(),
            Condition::Or(conds) => f.debug_tuple("Or").field(conds).finish(),
            Condition::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
            Condition::Function(_) => write!(f, "Function(..)"),
            Condition::IndexedFunction(_) => write!(f, "IndexedFunction(..)"),
        }
    }
}

fn lookup<'a>(state: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(state, |acc, segment| acc.get(segment))
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

impl Condition {
    pub fn evaluate(&self, state: &Value) -> bool {
        self.evaluate_with_index(state, 0)
    }

    /// Same as [`Condition::evaluate`] but threads a loop iteration index
    /// through to [`Condition::IndexedFunction`]; every other variant ignores
    /// it and just recurses.
    pub fn evaluate_with_index(&self, state: &Value, iteration_index: u32) -> bool {
        match self {
            Condition::Eq { path, value } => lookup(state, path) == Some(value),
            Condition::Ne { path, value } => lookup(state, path) != Some(value),
            Condition::Gt { path, value } => lookup(state, path)
                .zip(as_f64(value))
                .and_then(|(l, r)| as_f64(l).map(|l| l > r))
                .unwrap_or(false),
            Condition::Lt { path, value } => lookup(state, path)
                .zip(as_f64(value))
                .and_then(|(l, r)| as_f64(l).map(|l| l < r))
                .unwrap_or(false),
            Condition::Gte { path, value } => lookup(state, path)
                .zip(as_f64(value))
                .and_then(|(l, r)| as_f64(l).map(|l| l >= r))
                .unwrap_or(false),
            Condition::Lte { path, value } => lookup(state, path)
                .zip(as_f64(value))
                .and_then(|(l, r)| as_f64(l).map(|l| l <= r))
                .unwrap_or(false),
            Condition::Exists { path } => lookup(state, path).is_some(),
            Condition::And(conds) => conds.iter().all(|c| c.evaluate_with_index(state, iteration_index)),
            Condition::Or(conds) => conds.iter().any(|c| c.evaluate_with_index(state, iteration_index)),
            Condition::Not(inner) => !inner.evaluate_with_index(state, iteration_index),
            Condition::Function(f) => f(state),
            Condition::IndexedFunction(f) => f(state, iteration_index),
        }
    }
}

/// One labeled branch: `condition` gates whether `target` (the downstream
/// task id this branch feeds) stays active. `output_port` names the key this
/// branch's share of the input is written under in the executor's output.
#[derive(Clone)]
pub struct Branch {
    pub id: String,
    pub condition: Condition,
    pub target: TaskId,
    pub output_port: String,
}

/// Evaluates its branches against the resolved input (treated as state) and
/// returns `{"activeBranches": [...], "branchTargets": {...}, <output_port>:
/// input, ...}`. Does not itself mutate the graph — see module docs for how
/// disable-cascade is wired in by the scheduler from this output shape.
pub struct ConditionalExecutor {
    pub branches: Vec<Branch>,
    pub default_branch: Option<String>,
    /// `true`: first matching branch wins and only it stays active. `false`:
    /// every matching branch stays active simultaneously.
    pub exclusive: bool,
}

#[async_trait]
impl TaskExecutor for ConditionalExecutor {
    async fn execute(&self, input: Value, _ctx: &ExecuteContext) -> std::result::Result<Value, String> {
        let mut active: Vec<&Branch> = Vec::new();
        for branch in &self.branches {
            if branch.condition.evaluate(&input) {
                active.push(branch);
                if self.exclusive {
                    break;
                }
            }
        }

        if active.is_empty() {
            match &self.default_branch {
                Some(id) => {
                    let branch = self
                        .branches
                        .iter()
                        .find(|b| &b.id == id)
                        .ok_or_else(|| GraphError::UnknownBranch(id.clone()).to_string())?;
                    active.push(branch);
                }
                None => return Err("no branch condition matched and no default_branch set".to_string()),
            }
        }

        let mut run_output = serde_json::Map::new();
        for branch in &active {
            run_output.insert(branch.output_port.clone(), input.clone());
        }
        let active_ids: Vec<Value> = active.iter().map(|b| Value::String(b.id.clone())).collect();
        let branch_targets: serde_json::Map<String, Value> = self
            .branches
            .iter()
            .map(|b| (b.id.clone(), Value::String(b.target.to_string())))
            .collect();
        run_output.insert("activeBranches".into(), Value::Array(active_ids));
        run_output.insert("branchTargets".into(), Value::Object(branch_targets));
        Ok(Value::Object(run_output))
    }
}

impl ConditionalExecutor {
    /// Target task ids for branches whose id is *not* in `active_branches`,
    /// for the caller to disable-cascade.
    pub fn inactive_targets(&self, active_branches: &[String]) -> Vec<TaskId> {
        self.branches
            .iter()
            .filter(|b| !active_branches.iter().any(|id| id == &b.id))
            .map(|b| b.target)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_condition_matches_nested_path() {
        let cond = Condition::Eq { path: "user.role".into(), value: json!("admin") };
        assert!(cond.evaluate(&json!({"user": {"role": "admin"}})));
        assert!(!cond.evaluate(&json!({"user": {"role": "guest"}})));
    }

    #[test]
    fn and_or_not_compose() {
        let state = json!({"x": 5, "y": 10});
        let cond = Condition::And(vec![
            Condition::Gt { path: "x".into(), value: json!(1) },
            Condition::Not(Box::new(Condition::Gt { path: "y".into(), value: json!(100) })),
        ]);
        assert!(cond.evaluate(&state));
    }

    #[tokio::test]
    async fn first_matching_branch_wins() {
        let a = uuid::Uuid::new_v4();
        let b = uuid::Uuid::new_v4();
        let executor = ConditionalExecutor {
            branches: vec![
                Branch {
                    id: "low".into(),
                    condition: Condition::Lt { path: "x".into(), value: json!(10) },
                    target: a,
                    output_port: "low_out".into(),
                },
                Branch {
                    id: "high".into(),
                    condition: Condition::Gte { path: "x".into(), value: json!(10) },
                    target: b,
                    output_port: "high_out".into(),
                },
            ],
            default_branch: None,
            exclusive: true,
        };
        let registry = Arc::new(crate::registry::ServiceRegistry::default());
        let ctx = ExecuteContext::new(uuid::Uuid::new_v4(), Default::default(), Default::default(), registry);
        let out = executor.execute(json!({"x": 3}), &ctx).await.unwrap();
        assert_eq!(out["activeBranches"], json!(["low"]));
        assert_eq!(out["low_out"]["x"], json!(3));
        assert!(out.get("high_out").is_none());
        assert_eq!(executor.inactive_targets(&["low".to_string()]), vec![b]);
    }

    #[tokio::test]
    async fn non_exclusive_keeps_every_matching_branch_active() {
        let a = uuid::Uuid::new_v4();
        let b = uuid::Uuid::new_v4();
        let executor = ConditionalExecutor {
            branches: vec![
                Branch {
                    id: "cheap".into(),
                    condition: Condition::Lt { path: "price".into(), value: json!(100) },
                    target: a,
                    output_port: "cheap_out".into(),
                },
                Branch {
                    id: "fast".into(),
                    condition: Condition::Lt { path: "eta".into(), value: json!(5) },
                    target: b,
                    output_port: "fast_out".into(),
                },
            ],
            default_branch: None,
            exclusive: false,
        };
        let registry = Arc::new(crate::registry::ServiceRegistry::default());
        let ctx = ExecuteContext::new(uuid::Uuid::new_v4(), Default::default(), Default::default(), registry);
        let out = executor.execute(json!({"price": 10, "eta": 2}), &ctx).await.unwrap();
        let active: Vec<String> = out["activeBranches"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert!(active.contains(&"cheap".to_string()));
        assert!(active.contains(&"fast".to_string()));
        assert!(executor.inactive_targets(&active).is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_default_branch() {
        let a = uuid::Uuid::new_v4();
        let executor = ConditionalExecutor {
            branches: vec![Branch {
                id: "never".into(),
                condition: Condition::Exists { path: "absent".into() },
                target: a,
                output_port: "out".into(),
            }],
            default_branch: Some("never".into()),
            exclusive: true,
        };
        let registry = Arc::new(crate::registry::ServiceRegistry::default());
        let ctx = ExecuteContext::new(uuid::Uuid::new_v4(), Default::default(), Default::default(), registry);
        let out = executor.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(out["activeBranches"], json!(["never"]));
    }
}

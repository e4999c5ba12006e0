//! Run records: one execution instance of a task graph and its per-task
//! results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::errors::TaskError;

/// Named input variables supplied by the trigger that started a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vars(Map<String, Value>);

impl Vars {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builds variables from a JSON object. Non-object values are rejected
    /// because references address variables by name.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Walks a dotted path (`foo.bar.0`) through nested objects and arrays.
    pub fn get_path(&self, path: &[String]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.0.get(first)?;
        for segment in rest {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Vars {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Errored,
}

/// Terminal status of one task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    /// A required upstream dependency did not succeed; the task's own logic
    /// never executed.
    Skipped,
}

/// The result record of one task within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub task_id: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub output: Option<Value>,
    pub error: Option<TaskError>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// The task's static fan-in position, kept for deterministic ordering of
    /// sibling producers feeding one aggregate.
    pub index: u32,
}

impl TaskRun {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

/// One execution instance of a task graph.
///
/// Mutated only by the executor while running; read-only once it reaches a
/// terminal state. The id stays `0` until durable storage assigns one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub job_name: String,
    pub state: RunState,
    pub inputs: Vars,
    /// One record per task, in graph declaration order.
    pub task_runs: Vec<TaskRun>,
    /// Outputs of terminal tasks, in declared order. `None` marks a terminal
    /// task that did not succeed.
    pub outputs: Vec<Option<Value>>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Looks up one task's result by task id.
    pub fn task_run(&self, task_id: &str) -> Option<&TaskRun> {
        self.task_runs.iter().find(|tr| tr.task_id == task_id)
    }

    pub fn is_errored(&self) -> bool {
        self.state == RunState::Errored
    }

    /// All task failures, for diagnostics.
    pub fn errors(&self) -> impl Iterator<Item = (&str, &TaskError)> {
        self.task_runs
            .iter()
            .filter_map(|tr| tr.error.as_ref().map(|e| (tr.task_id.as_str(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vars_get_path_walks_objects_and_arrays() {
        let vars = Vars::from_value(json!({
            "feed": {"answers": [10, 20, 30]},
            "flat": 1
        }))
        .unwrap();

        let path = |s: &str| s.split('.').map(String::from).collect::<Vec<_>>();
        assert_eq!(vars.get_path(&path("feed.answers.1")), Some(&json!(20)));
        assert_eq!(vars.get_path(&path("flat")), Some(&json!(1)));
        assert_eq!(vars.get_path(&path("feed.missing")), None);
        assert_eq!(vars.get_path(&path("feed.answers.9")), None);
    }

    #[test]
    fn vars_reject_non_objects() {
        assert!(Vars::from_value(json!([1, 2])).is_none());
        assert!(Vars::from_value(json!("x")).is_none());
    }
}

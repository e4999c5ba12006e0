//! Error types for the pipeline engine.
//!
//! Structural problems are caught when a job's task graph is compiled and
//! surface as [`SpecError`]. Failures observed while a run executes are
//! recorded per task as [`TaskError`] values and travel inside the persisted
//! run, so operators can tell a flaky upstream service from a broken job
//! definition.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Compile-time errors raised while parsing or validating a task graph.
///
/// None of these can occur once a graph has compiled; run-time failures are
/// always classified as [`TaskError`]s instead.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("unknown task type '{task_type}' for task '{task_id}' (line {line})")]
    UnknownTaskType {
        task_id: String,
        task_type: String,
        line: usize,
    },

    #[error("duplicate task id '{task_id}' (line {line})")]
    DuplicateTask { task_id: String, line: usize },

    #[error("edge references undeclared task '{task_id}' (line {line})")]
    UnknownEdgeTask { task_id: String, line: usize },

    #[error("duplicate edge '{from} -> {to}' (line {line})")]
    DuplicateEdge {
        from: String,
        to: String,
        line: usize,
    },

    #[error("cycle detected through task '{task_id}'")]
    Cycle { task_id: String },

    #[error("graph contains no tasks")]
    EmptyGraph,

    #[error(
        "task '{task_id}' parameter '{param}' references '{target}', \
         which is not an upstream dependency"
    )]
    UnresolvedReference {
        task_id: String,
        param: String,
        target: String,
    },

    #[error("task '{task_id}': {message}")]
    BadParameter { task_id: String, message: String },

    #[error("task '{task_id}' uses unknown bridge '{name}'")]
    UnknownBridge { task_id: String, name: String },

    #[error("invalid bridge '{name}': {message}")]
    InvalidBridge { name: String, message: String },

    #[error("invalid job spec: {0}")]
    InvalidJob(String),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of a task failure within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// A parameter reference or fan-in input could not be resolved to a
    /// usable value.
    InputResolution,
    /// The task's underlying external call failed (connection error,
    /// non-2xx status, malformed response).
    ExternalCall,
    /// The task's deadline elapsed before it finished.
    Timeout,
    /// An aggregate task had fewer successful inputs than its minimum.
    InsufficientData,
    /// A required upstream task did not succeed; the task was skipped.
    DependencyFailed,
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskErrorKind::InputResolution => "input resolution",
            TaskErrorKind::ExternalCall => "external call",
            TaskErrorKind::Timeout => "timeout",
            TaskErrorKind::InsufficientData => "insufficient data",
            TaskErrorKind::DependencyFailed => "dependency failed",
        };
        f.write_str(name)
    }
}

/// A task failure recorded on its task run.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn input_resolution(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::InputResolution, message)
    }

    pub fn external_call(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::ExternalCall, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Timeout, message)
    }

    pub fn insufficient_data(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::InsufficientData, message)
    }

    pub fn dependency_failed(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::DependencyFailed, message)
    }
}

/// Errors from the persistence collaborator behind the run saver.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database operation failed: {operation}")]
    Database {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    /// Wrap a backend error with the operation that failed.
    pub fn database<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Database {
            operation: operation.into(),
            source: Box::new(source),
        }
    }
}

/// Errors surfaced by the run saver's submission side.
#[derive(Debug, Error)]
pub enum SaverError {
    /// The saver has been closed; no further runs are accepted.
    #[error("run saver is closed")]
    Closed,
}

/// Invalid engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Invalid(String),

    #[error("failed to build http client: {0}")]
    HttpClient(String),
}

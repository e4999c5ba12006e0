//! The task capability layer.
//!
//! Behaviors form a closed set of tagged variants behind one interface:
//! the scheduler only ever calls [`TaskBehavior::resolve`], so adding a task
//! type means adding a variant here, never touching the executor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::config::PipelineConfig;
use crate::core::errors::{ConfigError, SpecError, TaskError};
use crate::pipeline::bridge::{BridgeRegistry, BridgeTask};
use crate::pipeline::http::HttpTask;
use crate::pipeline::json::JsonParseTask;
use crate::pipeline::math::{DivideTask, MultiplyTask};
use crate::pipeline::parser::parse_duration;
use crate::pipeline::stats::{MeanTask, MedianTask};
use crate::pipeline::template::{Reference, ResolveCtx, Template};

/// Attributes task types are free to ignore; handled by graph compilation.
const GENERIC_ATTRS: &[&str] = &["timeout", "index"];

/// One fan-in slot: the output of a direct upstream task, absent when that
/// task did not succeed.
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub source: String,
    pub value: Option<Value>,
}

/// Shared environment every task executes against.
pub struct ExecEnv {
    pub config: PipelineConfig,
    pub client: reqwest::Client,
    pub bridges: Arc<BridgeRegistry>,
}

impl ExecEnv {
    pub fn new(config: PipelineConfig, bridges: Arc<BridgeRegistry>) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            config,
            client,
            bridges,
        })
    }
}

/// Everything one task sees while resolving: its ordered fan-in inputs,
/// the reference-resolution context, and the shared environment.
pub struct TaskContext<'a> {
    pub task_id: &'a str,
    pub inputs: &'a [TaskInput],
    pub env: &'a ExecEnv,
    pub refs: ResolveCtx<'a>,
}

impl TaskContext<'_> {
    /// The first available fan-in value, for single-input transforms.
    pub fn primary_input(&self) -> Result<&Value, TaskError> {
        self.inputs
            .iter()
            .find_map(|input| input.value.as_ref())
            .ok_or_else(|| {
                TaskError::input_resolution(format!(
                    "task '{}' has no upstream input available",
                    self.task_id
                ))
            })
    }
}

/// The single capability every task type implements.
#[async_trait]
pub trait TaskBehavior: Send + Sync {
    async fn resolve(&self, ctx: &TaskContext<'_>) -> Result<Value, TaskError>;
}

/// The closed set of task types.
#[derive(Debug, Clone)]
pub enum TaskKind {
    Http(HttpTask),
    Bridge(BridgeTask),
    JsonParse(JsonParseTask),
    Multiply(MultiplyTask),
    Divide(DivideTask),
    Median(MedianTask),
    Mean(MeanTask),
}

impl TaskKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            TaskKind::Http(_) => "http",
            TaskKind::Bridge(_) => "bridge",
            TaskKind::JsonParse(_) => "jsonparse",
            TaskKind::Multiply(_) => "multiply",
            TaskKind::Divide(_) => "divide",
            TaskKind::Median(_) => "median",
            TaskKind::Mean(_) => "mean",
        }
    }

    /// Aggregates tolerate missing fan-in inputs; their incoming edges
    /// default to optional.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, TaskKind::Median(_) | TaskKind::Mean(_))
    }

    /// Builds a task of the named type from its declared attributes.
    pub fn from_attrs(
        task_id: &str,
        task_type: &str,
        attrs: &[(String, String)],
        line: usize,
    ) -> Result<Self, SpecError> {
        let attrs = Attrs::new(task_id, attrs);
        match task_type {
            "http" => HttpTask::from_attrs(&attrs).map(TaskKind::Http),
            "bridge" => BridgeTask::from_attrs(&attrs).map(TaskKind::Bridge),
            "jsonparse" => JsonParseTask::from_attrs(&attrs).map(TaskKind::JsonParse),
            "multiply" => MultiplyTask::from_attrs(&attrs).map(TaskKind::Multiply),
            "divide" => DivideTask::from_attrs(&attrs).map(TaskKind::Divide),
            "median" => MedianTask::from_attrs(&attrs).map(TaskKind::Median),
            "mean" => MeanTask::from_attrs(&attrs).map(TaskKind::Mean),
            _ => Err(SpecError::UnknownTaskType {
                task_id: task_id.to_string(),
                task_type: task_type.to_string(),
                line,
            }),
        }
    }

    /// All parameter references with their attribute names, for
    /// compile-time validation.
    pub fn references(&self) -> Vec<(&'static str, &Reference)> {
        match self {
            TaskKind::Http(t) => t.references(),
            TaskKind::Bridge(t) => t.references(),
            TaskKind::JsonParse(t) => t.references(),
            TaskKind::Multiply(t) => t.references(),
            TaskKind::Divide(t) => t.references(),
            TaskKind::Median(_) | TaskKind::Mean(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl TaskBehavior for TaskKind {
    async fn resolve(&self, ctx: &TaskContext<'_>) -> Result<Value, TaskError> {
        match self {
            TaskKind::Http(t) => t.resolve(ctx).await,
            TaskKind::Bridge(t) => t.resolve(ctx).await,
            TaskKind::JsonParse(t) => t.resolve(ctx).await,
            TaskKind::Multiply(t) => t.resolve(ctx).await,
            TaskKind::Divide(t) => t.resolve(ctx).await,
            TaskKind::Median(t) => t.resolve(ctx).await,
            TaskKind::Mean(t) => t.resolve(ctx).await,
        }
    }
}

/// Attribute accessor used by task constructors; wraps every failure in a
/// [`SpecError::BadParameter`] carrying the task id.
pub struct Attrs<'a> {
    task_id: &'a str,
    attrs: &'a [(String, String)],
}

impl<'a> Attrs<'a> {
    pub fn new(task_id: &'a str, attrs: &'a [(String, String)]) -> Self {
        Self { task_id, attrs }
    }

    pub fn bad(&self, message: impl Into<String>) -> SpecError {
        SpecError::BadParameter {
            task_id: self.task_id.to_string(),
            message: message.into(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, key: &str) -> Result<&'a str, SpecError> {
        self.get(key)
            .ok_or_else(|| self.bad(format!("missing required attribute '{}'", key)))
    }

    pub fn template(&self, key: &str) -> Option<Template> {
        self.get(key).map(Template::parse)
    }

    pub fn require_template(&self, key: &str) -> Result<Template, SpecError> {
        self.require(key).map(Template::parse)
    }

    pub fn usize(&self, key: &str) -> Result<Option<usize>, SpecError> {
        self.get(key)
            .map(|raw| {
                raw.parse()
                    .map_err(|_| self.bad(format!("attribute '{}' must be an integer, got '{}'", key, raw)))
            })
            .transpose()
    }

    pub fn u32(&self, key: &str) -> Result<Option<u32>, SpecError> {
        self.get(key)
            .map(|raw| {
                raw.parse()
                    .map_err(|_| self.bad(format!("attribute '{}' must be an integer, got '{}'", key, raw)))
            })
            .transpose()
    }

    pub fn duration(&self, key: &str) -> Result<Option<Duration>, SpecError> {
        self.get(key)
            .map(|raw| parse_duration(raw).map_err(|message| self.bad(message)))
            .transpose()
    }

    /// Rejects attributes outside the allowed set; generic attributes are
    /// always accepted.
    pub fn expect_only(&self, allowed: &[&str]) -> Result<(), SpecError> {
        for (key, _) in self.attrs {
            if !allowed.contains(&key.as_str()) && !GENERIC_ATTRS.contains(&key.as_str()) {
                return Err(self.bad(format!("unknown attribute '{}'", key)));
            }
        }
        Ok(())
    }
}

//! JSON extraction task.

use async_trait::async_trait;
use serde_json::Value;

use crate::core::errors::{SpecError, TaskError};
use crate::pipeline::task::{Attrs, TaskBehavior, TaskContext};
use crate::pipeline::template::{Reference, Template};

/// Extracts a value from a JSON document by walking a comma-separated path
/// of object keys and array indices.
///
/// ```text
/// parse [type=jsonparse path="data,result"];
/// ```
///
/// The input is the `data` parameter when given, otherwise the first
/// upstream output. String inputs are parsed as JSON first, since fetch
/// tasks may hand over raw bodies. With `lax=true` a missing path yields
/// `null` instead of failing.
#[derive(Debug, Clone)]
pub struct JsonParseTask {
    pub path: Vec<String>,
    pub data: Option<Template>,
    pub lax: bool,
}

impl JsonParseTask {
    pub fn from_attrs(attrs: &Attrs<'_>) -> Result<Self, SpecError> {
        attrs.expect_only(&["path", "data", "lax"])?;

        let path: Vec<String> = attrs
            .require("path")?
            .split(',')
            .map(|segment| segment.trim().to_string())
            .filter(|segment| !segment.is_empty())
            .collect();
        if path.is_empty() {
            return Err(attrs.bad("attribute 'path' must contain at least one segment"));
        }

        let lax = match attrs.get("lax") {
            None | Some("false") => false,
            Some("true") => true,
            Some(other) => {
                return Err(attrs.bad(format!("attribute 'lax' must be true or false, got '{}'", other)))
            }
        };

        Ok(Self {
            path,
            data: attrs.template("data"),
            lax,
        })
    }

    pub fn references(&self) -> Vec<(&'static str, &Reference)> {
        self.data
            .iter()
            .flat_map(|t| t.references())
            .map(|r| ("data", r))
            .collect()
    }
}

#[async_trait]
impl TaskBehavior for JsonParseTask {
    async fn resolve(&self, ctx: &TaskContext<'_>) -> Result<Value, TaskError> {
        let input = match &self.data {
            Some(template) => template.resolve(&ctx.refs)?,
            None => ctx.primary_input()?.clone(),
        };

        // Fetch tasks may produce the body as a raw string.
        let document = match input {
            Value::String(text) => serde_json::from_str(&text).map_err(|e| {
                TaskError::external_call(format!("input is not valid JSON: {}", e))
            })?,
            other => other,
        };

        let mut current = &document;
        for (depth, segment) in self.path.iter().enumerate() {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|idx| items.get(idx)),
                _ => None,
            };
            current = match next {
                Some(value) => value,
                None if self.lax => return Ok(Value::Null),
                None => {
                    return Err(TaskError::external_call(format!(
                        "path segment '{}' not found at '{}'",
                        segment,
                        self.path[..=depth].join(",")
                    )))
                }
            };
        }
        Ok(current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PipelineConfig;
    use crate::core::errors::TaskErrorKind;
    use crate::pipeline::bridge::BridgeRegistry;
    use crate::pipeline::run::Vars;
    use crate::pipeline::task::{ExecEnv, TaskInput};
    use crate::pipeline::template::ResolveCtx;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn parse_task(attrs: &[(&str, &str)]) -> JsonParseTask {
        let owned: Vec<(String, String)> = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        JsonParseTask::from_attrs(&Attrs::new("parse", &owned)).unwrap()
    }

    async fn run(task: &JsonParseTask, input: Value) -> Result<Value, TaskError> {
        let env = ExecEnv::new(PipelineConfig::default(), Arc::new(BridgeRegistry::new())).unwrap();
        let vars = Vars::new();
        let upstream = HashMap::new();
        let inputs = vec![TaskInput {
            source: "fetch".to_string(),
            value: Some(input),
        }];
        let ctx = TaskContext {
            task_id: "parse",
            inputs: &inputs,
            env: &env,
            refs: ResolveCtx {
                vars: &vars,
                upstream: &upstream,
            },
        };
        task.resolve(&ctx).await
    }

    #[tokio::test]
    async fn walks_objects_and_arrays() {
        let task = parse_task(&[("path", "data,result,0")]);
        let input = json!({"data": {"result": [42.1, 43.0]}});
        assert_eq!(run(&task, input).await.unwrap(), json!(42.1));
    }

    #[tokio::test]
    async fn parses_string_inputs_as_json() {
        let task = parse_task(&[("path", "price")]);
        let input = json!(r#"{"price": "99.5"}"#);
        assert_eq!(run(&task, input).await.unwrap(), json!("99.5"));
    }

    #[tokio::test]
    async fn missing_path_fails_or_is_lax() {
        let strict = parse_task(&[("path", "data,absent")]);
        let err = run(&strict, json!({"data": {}})).await.unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::ExternalCall);

        let lax = parse_task(&[("path", "data,absent"), ("lax", "true")]);
        assert_eq!(run(&lax, json!({"data": {}})).await.unwrap(), Value::Null);
    }
}

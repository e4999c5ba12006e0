//! Bridge tasks: calls to named external adapters.
//!
//! Bridges decouple job specs from adapter deployment: a job names the
//! adapter, operators register where it lives. Requests follow the adapter
//! convention of a JSON envelope `{"id": ..., "data": ...}` POSTed to the
//! adapter's base URL.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

use crate::core::errors::{SpecError, TaskError};
use crate::pipeline::http::{resolve_request_data, snippet};
use crate::pipeline::task::{Attrs, TaskBehavior, TaskContext};
use crate::pipeline::template::{Reference, Template};

/// Named adapter endpoints, shared between the administrative surface
/// (writes) and executing tasks (reads).
#[derive(Debug, Default)]
pub struct BridgeRegistry {
    bridges: DashMap<String, Url>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces an adapter endpoint.
    pub fn register(&self, name: &str, url: &str) -> Result<(), SpecError> {
        let parsed = Url::parse(url).map_err(|e| SpecError::InvalidBridge {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SpecError::InvalidBridge {
                name: name.to_string(),
                message: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        self.bridges.insert(name.to_string(), parsed);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> bool {
        self.bridges.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bridges.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Url> {
        self.bridges.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }
}

/// Calls a registered bridge adapter.
///
/// ```text
/// vote [type=bridge name=voter_turnout request_data="{\"state\": \"$(inputs.state)\"}"];
/// ```
#[derive(Debug, Clone)]
pub struct BridgeTask {
    pub name: String,
    pub request_data: Option<Template>,
}

impl BridgeTask {
    pub fn from_attrs(attrs: &Attrs<'_>) -> Result<Self, SpecError> {
        attrs.expect_only(&["name", "request_data"])?;
        Ok(Self {
            name: attrs.require("name")?.to_string(),
            request_data: attrs.template("request_data"),
        })
    }

    pub fn references(&self) -> Vec<(&'static str, &Reference)> {
        self.request_data
            .iter()
            .flat_map(|t| t.references())
            .map(|r| ("request_data", r))
            .collect()
    }
}

#[async_trait]
impl TaskBehavior for BridgeTask {
    async fn resolve(&self, ctx: &TaskContext<'_>) -> Result<Value, TaskError> {
        let url = ctx.env.bridges.get(&self.name).ok_or_else(|| {
            TaskError::external_call(format!("bridge '{}' is not registered", self.name))
        })?;

        let data = match &self.request_data {
            Some(template) => resolve_request_data(template, ctx)?,
            None => Value::Null,
        };
        let envelope = json!({
            "id": Uuid::new_v4().to_string(),
            "data": data,
        });

        let response = ctx
            .env
            .client
            .post(url.clone())
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                TaskError::external_call(format!("bridge '{}' request failed: {}", self.name, e))
            })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            TaskError::external_call(format!("bridge '{}' response unreadable: {}", self.name, e))
        })?;

        if !status.is_success() {
            return Err(TaskError::external_call(format!(
                "bridge '{}' returned status {}: {}",
                self.name,
                status.as_u16(),
                snippet(&body)
            )));
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|e| {
            TaskError::external_call(format!(
                "bridge '{}' returned malformed JSON: {}",
                self.name, e
            ))
        })?;

        // Adapter convention: a non-null "error" field marks failure even
        // under a 2xx status.
        if let Some(error) = parsed.get("error").filter(|e| !e.is_null()) {
            return Err(TaskError::external_call(format!(
                "bridge '{}' reported error: {}",
                self.name, error
            )));
        }

        tracing::debug!(task_id = ctx.task_id, bridge = %self.name, "bridge call succeeded");
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_validates_urls() {
        let registry = BridgeRegistry::new();
        registry
            .register("turnout", "https://adapters.example.com/turnout")
            .unwrap();
        assert!(registry.contains("turnout"));

        assert!(registry.register("bad", "not a url").is_err());
        assert!(registry.register("ftp", "ftp://example.com").is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_replaces_and_removes() {
        let registry = BridgeRegistry::new();
        registry.register("a", "https://one.example.com").unwrap();
        registry.register("a", "https://two.example.com").unwrap();
        assert_eq!(
            registry.get("a").unwrap().as_str(),
            "https://two.example.com/"
        );
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
    }
}

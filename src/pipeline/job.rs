//! Job specifications: the YAML envelope around a graph source.
//!
//! ```yaml
//! name: eth_usd_median
//! description: Median ETH/USD price over three sources
//! max_task_duration: 10s
//! source: |
//!   ds1 [type=http url="https://a.example.com/price"];
//!   answer [type=median];
//!   ds1 -> answer;
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::config::ConfigOverrides;
use crate::core::errors::SpecError;
use crate::pipeline::bridge::BridgeRegistry;
use crate::pipeline::graph::TaskGraph;
use crate::pipeline::parser::parse_duration;

/// A job definition as stored and exchanged by the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Per-job default task deadline, e.g. `10s`.
    #[serde(default)]
    pub max_task_duration: Option<String>,
    /// Per-job run deadline, e.g. `1m`.
    #[serde(default)]
    pub max_run_duration: Option<String>,
    /// The task-graph specification text.
    pub source: String,
}

impl JobSpec {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SpecError> {
        let spec: JobSpec = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    fn validate(&self) -> Result<(), SpecError> {
        if self.name.trim().is_empty() {
            return Err(SpecError::InvalidJob("job name must not be empty".to_string()));
        }
        if self.source.trim().is_empty() {
            return Err(SpecError::InvalidJob(format!(
                "job '{}' has an empty source",
                self.name
            )));
        }
        Ok(())
    }

    /// Engine-configuration overrides declared by this job.
    pub fn overrides(&self) -> Result<ConfigOverrides, SpecError> {
        let parse = |field: &Option<String>, what: &str| {
            field
                .as_deref()
                .map(|raw| {
                    parse_duration(raw).map_err(|message| {
                        SpecError::InvalidJob(format!("job '{}' {}: {}", self.name, what, message))
                    })
                })
                .transpose()
        };
        Ok(ConfigOverrides {
            max_task_duration: parse(&self.max_task_duration, "max_task_duration")?,
            max_run_duration: parse(&self.max_run_duration, "max_run_duration")?,
        })
    }

    /// Compiles the job's graph source.
    pub fn compile(&self, bridges: &BridgeRegistry) -> Result<TaskGraph, SpecError> {
        TaskGraph::compile(&self.name, &self.source, bridges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const YAML: &str = r#"
name: eth_usd_median
description: Median ETH/USD price
max_task_duration: 10s
source: |
  ds1 [type=http url="https://a.example.com/price"];
  parse [type=jsonparse path="price"];
  answer [type=median];
  ds1 -> parse -> answer;
"#;

    #[test]
    fn parses_and_compiles() {
        let spec = JobSpec::from_yaml_str(YAML).unwrap();
        assert_eq!(spec.name, "eth_usd_median");
        assert_eq!(
            spec.overrides().unwrap().max_task_duration,
            Some(Duration::from_secs(10))
        );

        let graph = spec.compile(&BridgeRegistry::new()).unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.name(), "eth_usd_median");
    }

    #[test]
    fn empty_source_is_rejected() {
        let err = JobSpec::from_yaml_str("name: x\nsource: \"\"\n").unwrap_err();
        assert!(matches!(err, SpecError::InvalidJob(_)));
    }

    #[test]
    fn bad_durations_are_rejected() {
        let yaml = "name: x\nmax_task_duration: soon\nsource: \"a [type=median];\"\n";
        let spec = JobSpec::from_yaml_str(yaml).unwrap();
        assert!(spec.overrides().is_err());
    }
}

//! Engine-wide configuration.

use std::time::Duration;

use crate::core::errors::ConfigError;

/// Configuration for pipeline execution and persistence behavior.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of tasks in flight at once, across all concurrent runs.
    pub max_parallel_tasks: usize,
    /// Default per-task execution deadline; tasks may override it.
    pub default_task_timeout: Duration,
    /// Wall-clock bound for one whole run.
    pub max_run_duration: Duration,
    /// Capacity of the run saver's submission queue. Producers block when it
    /// is full.
    pub saver_queue_depth: usize,
    /// How many times the saver attempts to persist one run before raising
    /// an operational alert.
    pub saver_max_attempts: u32,
    /// Bound on archived run history; oldest runs are pruned past it.
    /// `None` keeps everything.
    pub max_saved_runs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 8,
            default_task_timeout: Duration::from_secs(30),
            max_run_duration: Duration::from_secs(120),
            saver_queue_depth: 128,
            saver_max_attempts: 3,
            max_saved_runs: Some(10_000),
        }
    }
}

impl PipelineConfig {
    /// Validates configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel_tasks == 0 {
            return Err(ConfigError::Invalid(
                "max_parallel_tasks must be greater than 0".to_string(),
            ));
        }

        if self.default_task_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "default_task_timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_run_duration.is_zero() {
            return Err(ConfigError::Invalid(
                "max_run_duration must be greater than 0".to_string(),
            ));
        }

        if self.max_run_duration > Duration::from_secs(86_400) {
            return Err(ConfigError::Invalid(
                "max_run_duration cannot exceed 24 hours".to_string(),
            ));
        }

        if self.saver_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "saver_queue_depth must be greater than 0".to_string(),
            ));
        }

        if self.saver_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "saver_max_attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Merges job-level overrides on top of this configuration, with the
    /// overrides taking precedence.
    pub fn merge(&self, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let merged = Self {
            default_task_timeout: overrides
                .max_task_duration
                .unwrap_or(self.default_task_timeout),
            max_run_duration: overrides.max_run_duration.unwrap_or(self.max_run_duration),
            ..self.clone()
        };
        merged.validate()?;
        Ok(merged)
    }
}

/// Per-job configuration overrides, parsed from a job spec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub max_task_duration: Option<Duration>,
    pub max_run_duration: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let config = PipelineConfig {
            max_parallel_tasks: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn merge_applies_overrides() {
        let base = PipelineConfig::default();
        let overrides = ConfigOverrides {
            max_task_duration: Some(Duration::from_secs(5)),
            max_run_duration: None,
        };
        let merged = base.merge(&overrides).unwrap();
        assert_eq!(merged.default_task_timeout, Duration::from_secs(5));
        assert_eq!(merged.max_run_duration, base.max_run_duration);
    }
}

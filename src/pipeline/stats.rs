//! Statistical aggregation tasks.
//!
//! Aggregates consume the ordered fan-in of their upstream tasks. Inputs
//! from failed or skipped siblings are absent and excluded from the sample;
//! if fewer than `min_answers` inputs remain the task fails with an
//! insufficient-data classification.

use async_trait::async_trait;
use serde_json::Value;

use crate::core::errors::{SpecError, TaskError};
use crate::pipeline::math::f64_to_value;
use crate::pipeline::task::{Attrs, TaskBehavior, TaskContext};
use crate::pipeline::template::value_to_f64;

/// Collects the successful numeric inputs in fan-in order. A present but
/// non-numeric input is a hard error: it means the upstream produced
/// something the aggregate cannot consume.
fn numeric_inputs(ctx: &TaskContext<'_>) -> Result<Vec<f64>, TaskError> {
    ctx.inputs
        .iter()
        .filter_map(|input| input.value.as_ref().map(|v| (input.source.as_str(), v)))
        .map(|(source, value)| {
            value_to_f64(value).map_err(|_| {
                TaskError::input_resolution(format!(
                    "input from task '{}' is not numeric: {}",
                    source, value
                ))
            })
        })
        .collect()
}

fn check_min_answers(
    ctx: &TaskContext<'_>,
    values: &[f64],
    min_answers: usize,
) -> Result<(), TaskError> {
    if values.len() < min_answers {
        return Err(TaskError::insufficient_data(format!(
            "{} of {} inputs succeeded, need at least {}",
            values.len(),
            ctx.inputs.len(),
            min_answers
        )));
    }
    Ok(())
}

/// Median over the successful inputs.
///
/// ```text
/// answer [type=median min_answers=2];
/// ```
#[derive(Debug, Clone)]
pub struct MedianTask {
    pub min_answers: usize,
}

impl MedianTask {
    pub fn from_attrs(attrs: &Attrs<'_>) -> Result<Self, SpecError> {
        attrs.expect_only(&["min_answers"])?;
        Ok(Self {
            min_answers: attrs.usize("min_answers")?.unwrap_or(1).max(1),
        })
    }
}

#[async_trait]
impl TaskBehavior for MedianTask {
    async fn resolve(&self, ctx: &TaskContext<'_>) -> Result<Value, TaskError> {
        let mut values = numeric_inputs(ctx)?;
        check_min_answers(ctx, &values, self.min_answers)?;

        values.sort_by(f64::total_cmp);
        let mid = values.len() / 2;
        let median = if values.len() % 2 == 1 {
            values[mid]
        } else {
            (values[mid - 1] + values[mid]) / 2.0
        };
        f64_to_value(median)
    }
}

/// Arithmetic mean over the successful inputs.
#[derive(Debug, Clone)]
pub struct MeanTask {
    pub min_answers: usize,
    pub precision: Option<u32>,
}

impl MeanTask {
    pub fn from_attrs(attrs: &Attrs<'_>) -> Result<Self, SpecError> {
        attrs.expect_only(&["min_answers", "precision"])?;
        Ok(Self {
            min_answers: attrs.usize("min_answers")?.unwrap_or(1).max(1),
            precision: attrs.u32("precision")?,
        })
    }
}

#[async_trait]
impl TaskBehavior for MeanTask {
    async fn resolve(&self, ctx: &TaskContext<'_>) -> Result<Value, TaskError> {
        let values = numeric_inputs(ctx)?;
        check_min_answers(ctx, &values, self.min_answers)?;

        let mut mean = values.iter().sum::<f64>() / values.len() as f64;
        if let Some(precision) = self.precision {
            let factor = 10f64.powi(precision as i32);
            mean = (mean * factor).round() / factor;
        }
        f64_to_value(mean)
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
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    async fn median_of(values: Vec<Option<Value>>, min_answers: usize) -> Result<Value, TaskError> {
        let env = ExecEnv::new(PipelineConfig::default(), Arc::new(BridgeRegistry::new())).unwrap();
        let vars = Vars::new();
        let upstream = HashMap::new();
        let inputs: Vec<TaskInput> = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| TaskInput {
                source: format!("ds{}", i),
                value,
            })
            .collect();
        let ctx = TaskContext {
            task_id: "answer",
            inputs: &inputs,
            env: &env,
            refs: ResolveCtx {
                vars: &vars,
                upstream: &upstream,
            },
        };
        MedianTask { min_answers }.resolve(&ctx).await
    }

    #[tokio::test]
    async fn even_count_averages_middle_pair() {
        let result = median_of(
            vec![
                Some(json!(10)),
                Some(json!(20)),
                Some(json!(30)),
                Some(json!(0)),
            ],
            1,
        )
        .await
        .unwrap();
        assert_eq!(result.as_f64().unwrap(), 15.0);
    }

    #[tokio::test]
    async fn odd_count_takes_middle() {
        let result = median_of(vec![Some(json!(10)), Some(json!(20)), Some(json!(30))], 1)
            .await
            .unwrap();
        assert_eq!(result.as_f64().unwrap(), 20.0);
    }

    #[tokio::test]
    async fn absent_inputs_are_excluded() {
        let result = median_of(vec![Some(json!(10)), None, Some(json!(30))], 2)
            .await
            .unwrap();
        assert_eq!(result.as_f64().unwrap(), 20.0);
    }

    #[tokio::test]
    async fn too_few_answers_is_insufficient_data() {
        let err = median_of(vec![Some(json!(10)), None, None], 2)
            .await
            .unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::InsufficientData);
    }

    #[tokio::test]
    async fn non_numeric_success_is_rejected() {
        let err = median_of(vec![Some(json!({"price": 10}))], 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::InputResolution);
    }
}

//! Arithmetic transform tasks.

use async_trait::async_trait;
use serde_json::{Number, Value};

use crate::core::errors::{SpecError, TaskError};
use crate::pipeline::task::{Attrs, TaskBehavior, TaskContext};
use crate::pipeline::template::{value_to_f64, Reference, Template};

/// Converts a computed `f64` back into a JSON number.
pub(crate) fn f64_to_value(n: f64) -> Result<Value, TaskError> {
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| TaskError::input_resolution("result is not a finite number"))
}

/// Multiplies its input by a factor.
///
/// ```text
/// scale [type=multiply times=100];
/// ```
#[derive(Debug, Clone)]
pub struct MultiplyTask {
    pub input: Option<Template>,
    pub times: Template,
}

impl MultiplyTask {
    pub fn from_attrs(attrs: &Attrs<'_>) -> Result<Self, SpecError> {
        attrs.expect_only(&["input", "times"])?;
        let times = attrs.require_template("times")?;
        if !times.has_references() && times.raw().parse::<f64>().is_err() {
            return Err(attrs.bad(format!("attribute 'times' must be a number, got '{}'", times.raw())));
        }
        Ok(Self {
            input: attrs.template("input"),
            times,
        })
    }

    pub fn references(&self) -> Vec<(&'static str, &Reference)> {
        self.input
            .iter()
            .flat_map(|t| t.references())
            .map(|r| ("input", r))
            .chain(self.times.references().map(|r| ("times", r)))
            .collect()
    }
}

#[async_trait]
impl TaskBehavior for MultiplyTask {
    async fn resolve(&self, ctx: &TaskContext<'_>) -> Result<Value, TaskError> {
        let input = match &self.input {
            Some(template) => template.resolve_f64(&ctx.refs)?,
            None => value_to_f64(ctx.primary_input()?)?,
        };
        let times = self.times.resolve_f64(&ctx.refs)?;
        f64_to_value(input * times)
    }
}

/// Divides its input by a divisor, optionally rounding the result.
///
/// ```text
/// normalize [type=divide divisor=1000000 precision=6];
/// ```
#[derive(Debug, Clone)]
pub struct DivideTask {
    pub input: Option<Template>,
    pub divisor: Template,
    pub precision: Option<u32>,
}

impl DivideTask {
    pub fn from_attrs(attrs: &Attrs<'_>) -> Result<Self, SpecError> {
        attrs.expect_only(&["input", "divisor", "precision"])?;
        let divisor = attrs.require_template("divisor")?;
        if !divisor.has_references() && divisor.raw().parse::<f64>().is_err() {
            return Err(attrs.bad(format!(
                "attribute 'divisor' must be a number, got '{}'",
                divisor.raw()
            )));
        }
        Ok(Self {
            input: attrs.template("input"),
            divisor,
            precision: attrs.u32("precision")?,
        })
    }

    pub fn references(&self) -> Vec<(&'static str, &Reference)> {
        self.input
            .iter()
            .flat_map(|t| t.references())
            .map(|r| ("input", r))
            .chain(self.divisor.references().map(|r| ("divisor", r)))
            .collect()
    }
}

#[async_trait]
impl TaskBehavior for DivideTask {
    async fn resolve(&self, ctx: &TaskContext<'_>) -> Result<Value, TaskError> {
        let input = match &self.input {
            Some(template) => template.resolve_f64(&ctx.refs)?,
            None => value_to_f64(ctx.primary_input()?)?,
        };
        let divisor = self.divisor.resolve_f64(&ctx.refs)?;
        if divisor == 0.0 {
            return Err(TaskError::input_resolution("division by zero"));
        }
        let mut result = input / divisor;
        if let Some(precision) = self.precision {
            let factor = 10f64.powi(precision as i32);
            result = (result * factor).round() / factor;
        }
        f64_to_value(result)
    }
}

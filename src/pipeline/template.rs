//! Parameter templating.
//!
//! Parameters use single-pass `$(reference)` substitution. A reference head
//! is either the id of a direct upstream task or the reserved `inputs` head
//! addressing the run's trigger variables; the remaining dotted segments
//! walk into the referenced JSON value.
//!
//! A parameter whose whole value is exactly one reference resolves to the
//! referenced value with its JSON type intact. References embedded in a
//! longer string render as text. There is no nesting and no escaping; text
//! that does not match the reference grammar passes through literally.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::core::errors::TaskError;
use crate::pipeline::run::Vars;

lazy_static! {
    static ref REFERENCE_RE: Regex =
        Regex::new(r"\$\(\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\)")
            .expect("reference regex is valid");
}

/// Reserved reference head addressing trigger variables.
pub const INPUTS_HEAD: &str = "inputs";

/// A parsed `$(head.path...)` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub head: String,
    pub path: Vec<String>,
}

impl Reference {
    fn parse(expr: &str) -> Self {
        let mut segments = expr.split('.').map(str::to_string);
        let head = segments.next().unwrap_or_default();
        Self {
            head,
            path: segments.collect(),
        }
    }

    pub fn is_input(&self) -> bool {
        self.head == INPUTS_HEAD
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.head)?;
        for segment in &self.path {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Lit(String),
    Ref(Reference),
}

/// A parameter value with zero or more embedded references.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pieces: Vec<Piece>,
    raw: String,
}

/// Context a template resolves against: trigger variables plus the outputs
/// of the task's direct upstream dependencies, keyed by task id.
pub struct ResolveCtx<'a> {
    pub vars: &'a Vars,
    pub upstream: &'a HashMap<String, Value>,
}

impl<'a> ResolveCtx<'a> {
    fn lookup(&self, reference: &Reference) -> Result<Value, TaskError> {
        if reference.is_input() {
            return self.vars.get_path(&reference.path).cloned().ok_or_else(|| {
                TaskError::input_resolution(format!(
                    "trigger did not supply variable '$({})'",
                    reference
                ))
            });
        }

        let root = self.upstream.get(&reference.head).ok_or_else(|| {
            TaskError::input_resolution(format!(
                "upstream task '{}' produced no output",
                reference.head
            ))
        })?;

        let mut current = root;
        for segment in &reference.path {
            current = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|idx| items.get(idx)),
                _ => None,
            }
            .ok_or_else(|| {
                TaskError::input_resolution(format!(
                    "'$({})' not found in output of task '{}'",
                    reference, reference.head
                ))
            })?;
        }
        Ok(current.clone())
    }
}

impl Template {
    /// Parses a raw attribute value. Never fails: text outside the
    /// reference grammar is kept literally.
    pub fn parse(raw: &str) -> Self {
        let mut pieces = Vec::new();
        let mut last = 0;
        for caps in REFERENCE_RE.captures_iter(raw) {
            let whole = caps.get(0).expect("capture 0 always present");
            if whole.start() > last {
                pieces.push(Piece::Lit(raw[last..whole.start()].to_string()));
            }
            pieces.push(Piece::Ref(Reference::parse(&caps[1])));
            last = whole.end();
        }
        if last < raw.len() {
            pieces.push(Piece::Lit(raw[last..].to_string()));
        }
        Self {
            pieces,
            raw: raw.to_string(),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// All references mentioned by this template.
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.pieces.iter().filter_map(|piece| match piece {
            Piece::Ref(r) => Some(r),
            Piece::Lit(_) => None,
        })
    }

    pub fn has_references(&self) -> bool {
        self.references().next().is_some()
    }

    /// Resolves to a JSON value. A whole-value reference keeps the
    /// referenced type; anything else renders to a string.
    pub fn resolve(&self, ctx: &ResolveCtx<'_>) -> Result<Value, TaskError> {
        if let [Piece::Ref(reference)] = self.pieces.as_slice() {
            return ctx.lookup(reference);
        }

        let mut rendered = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Lit(text) => rendered.push_str(text),
                Piece::Ref(reference) => {
                    rendered.push_str(&render_value(&ctx.lookup(reference)?))
                }
            }
        }
        Ok(Value::String(rendered))
    }

    /// Resolves and renders as a string.
    pub fn resolve_string(&self, ctx: &ResolveCtx<'_>) -> Result<String, TaskError> {
        Ok(render_value(&self.resolve(ctx)?))
    }

    /// Resolves and coerces to a finite number.
    pub fn resolve_f64(&self, ctx: &ResolveCtx<'_>) -> Result<f64, TaskError> {
        value_to_f64(&self.resolve(ctx)?)
    }
}

/// Renders a JSON value for string interpolation: strings stay unquoted,
/// everything else uses its JSON form.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Coerces a JSON value to a finite `f64`; numeric strings are accepted
/// because external adapters frequently quote numbers.
pub fn value_to_f64(value: &Value) -> Result<f64, TaskError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(TaskError::input_resolution(format!(
            "expected a finite number, got {}",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx<'a>(vars: &'a Vars, upstream: &'a HashMap<String, Value>) -> ResolveCtx<'a> {
        ResolveCtx { vars, upstream }
    }

    #[test]
    fn whole_value_reference_keeps_type() {
        let vars = Vars::from_value(json!({"times": 100})).unwrap();
        let upstream = HashMap::new();
        let template = Template::parse("$(inputs.times)");
        assert_eq!(template.resolve(&ctx(&vars, &upstream)).unwrap(), json!(100));
    }

    #[test]
    fn embedded_reference_renders_to_string() {
        let vars = Vars::from_value(json!({"pair": "eth-usd"})).unwrap();
        let upstream = HashMap::new();
        let template = Template::parse("https://feeds.example.com/$(inputs.pair)/latest");
        assert_eq!(
            template.resolve(&ctx(&vars, &upstream)).unwrap(),
            json!("https://feeds.example.com/eth-usd/latest")
        );
    }

    #[test]
    fn upstream_reference_walks_path() {
        let vars = Vars::new();
        let mut upstream = HashMap::new();
        upstream.insert("fetch".to_string(), json!({"data": {"result": 42.5}}));
        let template = Template::parse("$(fetch.data.result)");
        assert_eq!(
            template.resolve(&ctx(&vars, &upstream)).unwrap(),
            json!(42.5)
        );
    }

    #[test]
    fn missing_variable_is_an_input_resolution_error() {
        let vars = Vars::new();
        let upstream = HashMap::new();
        let template = Template::parse("$(inputs.absent)");
        let err = template.resolve(&ctx(&vars, &upstream)).unwrap_err();
        assert_eq!(err.kind, crate::core::errors::TaskErrorKind::InputResolution);
    }

    #[test]
    fn literal_text_passes_through() {
        let vars = Vars::new();
        let upstream = HashMap::new();
        let template = Template::parse("plain $ text (no ref)");
        assert!(!template.has_references());
        assert_eq!(
            template.resolve(&ctx(&vars, &upstream)).unwrap(),
            json!("plain $ text (no ref)")
        );
    }

    #[test]
    fn numeric_strings_coerce() {
        assert_eq!(value_to_f64(&json!("12.5")).unwrap(), 12.5);
        assert_eq!(value_to_f64(&json!(3)).unwrap(), 3.0);
        assert!(value_to_f64(&json!({"a": 1})).is_err());
        assert!(value_to_f64(&json!("not a number")).is_err());
    }
}

//! HTTP fetch task.

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::core::errors::{SpecError, TaskError};
use crate::pipeline::task::{Attrs, TaskBehavior, TaskContext};
use crate::pipeline::template::{Reference, Template};

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

/// Fetches a URL and yields the response body, parsed as JSON when possible.
///
/// ```text
/// ds1 [type=http method=GET url="https://feeds.example.com/$(inputs.pair)"];
/// ```
#[derive(Debug, Clone)]
pub struct HttpTask {
    pub method: String,
    pub url: Template,
    pub request_data: Option<Template>,
}

impl HttpTask {
    pub fn from_attrs(attrs: &Attrs<'_>) -> Result<Self, SpecError> {
        attrs.expect_only(&["method", "url", "request_data"])?;

        let method = attrs.get("method").unwrap_or("GET").to_ascii_uppercase();
        if !ALLOWED_METHODS.contains(&method.as_str()) {
            return Err(attrs.bad(format!("unsupported http method '{}'", method)));
        }

        let url = attrs.require_template("url")?;
        if !url.has_references() {
            Url::parse(url.raw())
                .map_err(|e| attrs.bad(format!("invalid url '{}': {}", url.raw(), e)))?;
        }

        Ok(Self {
            method,
            url,
            request_data: attrs.template("request_data"),
        })
    }

    pub fn references(&self) -> Vec<(&'static str, &Reference)> {
        let mut refs: Vec<_> = self.url.references().map(|r| ("url", r)).collect();
        if let Some(data) = &self.request_data {
            refs.extend(data.references().map(|r| ("request_data", r)));
        }
        refs
    }
}

#[async_trait]
impl TaskBehavior for HttpTask {
    async fn resolve(&self, ctx: &TaskContext<'_>) -> Result<Value, TaskError> {
        let url_text = self.url.resolve_string(&ctx.refs)?;
        let url = Url::parse(&url_text)
            .map_err(|e| TaskError::external_call(format!("invalid url '{}': {}", url_text, e)))?;
        let method: reqwest::Method = self
            .method
            .parse()
            .map_err(|_| TaskError::external_call(format!("invalid method '{}'", self.method)))?;

        let mut request = ctx.env.client.request(method, url);
        if let Some(template) = &self.request_data {
            request = request.json(&resolve_request_data(template, ctx)?);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TaskError::external_call(format!("request to {} failed: {}", url_text, e)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TaskError::external_call(format!("reading body from {} failed: {}", url_text, e)))?;

        if !status.is_success() {
            return Err(TaskError::external_call(format!(
                "http status {} from {}: {}",
                status.as_u16(),
                url_text,
                snippet(&body)
            )));
        }

        tracing::debug!(task_id = ctx.task_id, url = %url_text, status = status.as_u16(), "http fetch succeeded");
        Ok(parse_body(body))
    }
}

/// Resolves the `request_data` attribute to a JSON document. A resolved
/// string must itself be valid JSON.
pub(crate) fn resolve_request_data(
    template: &Template,
    ctx: &TaskContext<'_>,
) -> Result<Value, TaskError> {
    match template.resolve(&ctx.refs)? {
        Value::String(text) => serde_json::from_str(&text).map_err(|e| {
            TaskError::input_resolution(format!("request_data is not valid JSON: {}", e))
        }),
        other => Ok(other),
    }
}

/// Bodies are JSON when they parse as JSON, raw text otherwise.
fn parse_body(body: String) -> Value {
    serde_json::from_str(&body).unwrap_or(Value::String(body))
}

/// Bounds response excerpts embedded in error messages.
pub(crate) fn snippet(body: &str) -> String {
    const LIMIT: usize = 140;
    if body.len() <= LIMIT {
        body.to_string()
    } else {
        let cut = body
            .char_indices()
            .take_while(|(i, _)| *i < LIMIT)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &body[..cut])
    }
}

//! `http_request`: plain HTTP calls with `reqwest`.

use crate::ToolDef;
use crate::safety::{RiskVerdict, http_method_is_safe};
use crate::tools::core::{
    DEFAULT_MAX_RESULT_BYTES, Tool, ToolArgs, ToolContext, ToolError, ToolFuture, ToolSuccess,
    optional_str, tool_parameters, truncate_text, typed_args,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize, JsonSchema)]
pub struct HttpRequestArgs {
    /// Absolute http(s) URL.
    pub url: String,
    /// HTTP method (default GET).
    #[serde(default)]
    pub method: Option<String>,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body, sent as-is.
    #[serde(default)]
    pub body: Option<String>,
}

/// Sends one HTTP request and returns status and body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpRequest {
    pub fn new() -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("steward/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            max_body_bytes: DEFAULT_MAX_RESULT_BYTES,
        })
    }

    pub fn max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }
}

fn method_of(args: &ToolArgs) -> String {
    optional_str(args, "method")
        .unwrap_or("GET")
        .trim()
        .to_ascii_uppercase()
}

impl Tool for HttpRequest {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "http_request",
            "Send an HTTP request and return the status code and response body.",
            tool_parameters::<HttpRequestArgs>(),
        )
    }

    fn assess_risk(&self, args: &ToolArgs) -> Option<RiskVerdict> {
        let method = method_of(args);
        http_method_is_safe(&method).then(|| RiskVerdict::low(format!("safe method {method}")))
    }

    fn describe_action(&self, args: &ToolArgs) -> String {
        let mut text = format!(
            "HTTP {} {}",
            method_of(args),
            optional_str(args, "url").unwrap_or("")
        );
        if let Some(body) = optional_str(args, "body") {
            text.push_str("\n  body: ");
            text.push_str(&truncate_text(body.to_string(), 500));
        }
        text
    }

    fn execute<'a>(&'a self, args: ToolArgs, ctx: ToolContext<'a>) -> ToolFuture<'a> {
        Box::pin(async move {
            let method = method_of(&args);
            let args: HttpRequestArgs = typed_args(args)?;
            if !(args.url.starts_with("http://") || args.url.starts_with("https://")) {
                return Err(ToolError::InvalidArguments(format!(
                    "url must start with http:// or https://, got '{}'",
                    args.url
                )));
            }
            let method = reqwest::Method::from_bytes(method.as_bytes())
                .map_err(|_| ToolError::InvalidArguments(format!("invalid method '{method}'")))?;

            let mut request = self.client.request(method.clone(), &args.url);
            for (name, value) in &args.headers {
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some(body) = args.body {
                request = request.body(body);
            }

            let response = tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
                r = request.send() => r.map_err(|e| ToolError::failed(format!("request failed: {e}")))?,
            };
            let status = response.status();
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let text = tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
                t = response.text() => t.map_err(|e| ToolError::failed(format!("failed to read response: {e}")))?,
            };
            debug!("[http] {method} {} -> {status} ({} bytes)", args.url, text.len());

            let body = truncate_text(text, self.max_body_bytes);
            if status.is_client_error() || status.is_server_error() {
                let reason = status.canonical_reason().unwrap_or("error");
                return Err(ToolError::failed(format!(
                    "HTTP {} {reason}: {}",
                    status.as_u16(),
                    truncate_text(body, 1000)
                )));
            }

            let mut payload = json!({ "status_code": status.as_u16() });
            let is_json = content_type.as_deref().is_some_and(|c| c.contains("json"));
            payload["body"] = match serde_json::from_str::<Value>(&body) {
                Ok(v) if is_json => v,
                _ => json!(body),
            };
            if let Some(ct) = content_type {
                payload["content_type"] = json!(ct);
            }
            Ok(ToolSuccess::new(payload))
        })
    }
}

//! The JSON contract for tool results fed back to the model.
//!
//! Every result is an object with a `status` of `success`, `error` or
//! `cancelled`. Error results carry the message under `error` plus the
//! classifier's fields; success results carry the tool's payload.

use crate::Message;
use crate::diagnostics::{ErrorInfo, extract_error_info};
use serde::Serialize;
use serde_json::{Value, json};

/// Acknowledgement the model receives when an artifact was shown directly.
pub const ARTIFACT_ACK: &str =
    "The result has already been displayed to the user. Do not repeat or summarize it.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
    Cancelled,
}

/// A tool result ready to be appended as a Tool message.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub status: ToolStatus,
    pub content: Value,
}

impl ToolOutcome {
    /// Success with the tool's payload merged next to `status`.
    pub fn success(payload: Value) -> Self {
        let mut content = json!({ "status": ToolStatus::Success });
        match payload {
            Value::Object(fields) => {
                for (k, v) in fields {
                    if k != "status" {
                        content[k] = v;
                    }
                }
            }
            Value::Null => {}
            other => content["result"] = other,
        }
        Self {
            status: ToolStatus::Success,
            content,
        }
    }

    /// Success whose payload was displayed to the user instead.
    pub fn displayed(summary: Option<&Value>) -> Self {
        let mut outcome = Self::success(json!({ "message": ARTIFACT_ACK }));
        if let Some(s) = summary {
            outcome.content["summary"] = s.clone();
        }
        outcome
    }

    /// Failure, classified into structured fields for the model.
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        let info = extract_error_info(Some(&message));
        Self::error_with(message, &info)
    }

    pub fn error_with(message: impl Into<String>, info: &ErrorInfo) -> Self {
        let mut content = json!({
            "status": ToolStatus::Error,
            "error": message.into(),
            "error_type": info.error_type,
        });
        if !info.error_code.is_empty() {
            content["error_code"] = json!(info.error_code);
        }
        if !info.affected_resources.is_empty() {
            content["affected_resources"] = json!(info.affected_resources);
        }
        if !info.dependencies.is_empty() {
            content["dependencies"] = json!(info.dependencies);
        }
        if !info.suggested_actions.is_empty() {
            content["suggested_actions"] = json!(info.suggested_actions);
        }
        Self {
            status: ToolStatus::Error,
            content,
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Cancelled,
            content: json!({ "status": ToolStatus::Cancelled, "message": reason.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    pub fn to_message(&self, tool_call_id: &str) -> Message {
        Message::tool_result(tool_call_id, self.content.to_string())
    }
}

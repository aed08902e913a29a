//! Orchestration engine for a tool-calling CLI agent.
//!
//! `steward-rs` turns a user request into a sequence of tool invocations
//! chosen by a remote language model (via the
//! [OpenRouter](https://openrouter.ai/) chat completions API). The core
//! abstraction is the [`Orchestrator`](agent::Orchestrator): a bounded loop
//! that sends the conversation to the model, runs each requested tool call
//! (asking the user first when the call is risky), appends the results and
//! repeats until the model signals it is done.
//!
//! # Getting started
//!
//! ```ignore
//! use steward_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OpenRouterClient::new(std::env::var("OPENROUTER_KEY")?)?;
//!     let executor = CommandExecutor::new(CommandOptions::default());
//!     let registry = ToolRegistry::new()
//!         .with(RunCommand::new(executor.clone()))
//!         .with(RenderTable::new());
//!
//!     let config = AgentConfig::default().with_max_iterations(10);
//!     let ui = ConsoleUi::new();
//!     let audit = FileAuditLog::new(".steward/audit.log");
//!     let cancel = CancellationToken::new();
//!
//!     let outcome = Orchestrator::new(&client, &registry, &config, &ui, &audit, &cancel)
//!         .with_event_handler(&LoggingHandler)
//!         .run_turn(TurnInput::new("How many rows are in the users table?"))
//!         .await?;
//!     println!("{}", outcome.text);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | [`Orchestrator`](agent::Orchestrator) loop, config, events, hallucination guard, sessions |
//! | [`safety`] | Risk rules, [`RiskAssessor`](safety::RiskAssessor), audit sinks |
//! | [`context`] | Token budget, history/skills compression, memo cache |
//! | [`diagnostics`] | Error classification into structured [`ErrorInfo`](diagnostics::ErrorInfo) |
//! | [`exec`] | [`CommandExecutor`](exec::CommandExecutor) with streaming and idle timeout |
//! | [`tools`] | [`Tool`](tools::Tool) trait, [`ToolRegistry`](tools::ToolRegistry), built-in tools |
//! | [`api`] | [`ModelClient`](api::ModelClient) seam, retry with backoff |
//! | [`ui`] | [`Ui`](ui::Ui) port and the plain [`ConsoleUi`](ui::ConsoleUi) |

pub mod agent;
pub mod api;
pub mod context;
pub mod diagnostics;
pub mod exec;
pub mod prelude;
pub mod safety;
pub mod tools;
pub mod ui;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for all LLM calls.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// # Example
///
/// ```
/// use steward_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct QueryArgs {
///     sql: String,
///     #[serde(default)]
///     limit: Option<u32>,
/// }
///
/// let schema = json_schema_for::<QueryArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"sql".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body. Unused optional fields are omitted from
/// serialization.
#[derive(Serialize, Debug, Default, Clone)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    pub messages: Vec<Message>,

    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Assistant turn carrying tool calls, plus any text the model emitted
    /// alongside them.
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.filter(|c| !c.is_empty()),
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }

    /// Content as a string slice, empty when absent.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Characters this message contributes to the serialized prompt.
    pub fn char_len(&self) -> usize {
        let calls: usize = self.tool_calls.as_ref().map_or(0, |calls| {
            calls
                .iter()
                .map(|c| c.function.name.len() + c.function.arguments.len())
                .sum()
        });
        self.text().len() + calls
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the API (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionCallData {
    pub name: String,
    /// Raw JSON argument string, parsed lazily.
    pub arguments: String,
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Clean return type from a chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

impl ChatCompletion {
    /// Whether the model signalled it is done with this turn.
    pub fn is_finished(&self) -> bool {
        matches!(self.finish_reason.as_deref(), Some("stop" | "end_turn"))
    }
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    referer: String,
    title: String,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        Self::with_headers(api_key, "https://github.com/tacryt-socryp/steward", "steward")
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("steward/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            referer: referer.into(),
            title: title.into(),
        })
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, String> {
        let tool_count = body.tools.as_ref().map_or(0, |t| t.len());
        debug!(
            "LLM request: model={}, messages={}, tools={}, max_tokens={}, temp={}",
            body.model.as_deref().unwrap_or("(none)"),
            body.messages.len(),
            tool_count,
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("OpenRouter API HTTP {status}: {text}"));
        }

        parse_chat_response(&text)
    }
}

/// Decode a raw chat completions body.
pub(crate) fn parse_chat_response(text: &str) -> Result<ChatCompletion, String> {
    let parsed: RawChatResponse =
        serde_json::from_str(text).map_err(|e| format!("failed to parse response: {e}"))?;

    if let Some(err) = parsed.error {
        return Err(format!("OpenRouter API error: {}", err.message));
    }

    if let Some(ref usage) = parsed.usage {
        debug!(
            "Token usage: prompt={}, completion={}, total={}",
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
            usage.total_tokens.unwrap_or(0),
        );
    }

    let Some(choice) = parsed.choices.and_then(|c| c.into_iter().next()) else {
        debug!("LLM output: empty (no choices)");
        return Ok(ChatCompletion {
            usage: parsed.usage,
            ..Default::default()
        });
    };

    let tool_calls = choice.message.tool_calls.unwrap_or_default();
    debug!(
        "LLM output: {} chars text, {} tool call(s), finish={}",
        choice.message.content.as_ref().map_or(0, |s| s.len()),
        tool_calls.len(),
        choice.finish_reason.as_deref().unwrap_or("-"),
    );
    Ok(ChatCompletion {
        content: choice.message.content,
        tool_calls,
        usage: parsed.usage,
        finish_reason: choice.finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content.as_deref(), Some("hello"));

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);

        let assist = Message::assistant_text("prefill");
        assert_eq!(assist.role, MessageRole::Assistant);

        let tool = Message::tool_result("call-1", "result");
        assert_eq!(tool.role, MessageRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call-1"));

        let calls = Message::assistant_tool_calls(
            Some(String::new()),
            vec![ToolCall::new("c1", "execute_sql", "{}")],
        );
        assert!(calls.content.is_none());
        assert_eq!(calls.char_len(), "execute_sql".len() + 2);
    }

    #[test]
    fn chat_request_default_skips_none_fields() {
        let req = ChatRequest {
            model: Some("test-model".into()),
            messages: vec![Message::user("hi")],
            max_tokens: 100,
            temperature: 0.5,
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("top_p").is_none());
        assert!(json.get("tools").is_none());
        assert_eq!(json["model"], "test-model");
    }

    #[test]
    fn parses_tool_call_response() {
        let body = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "execute_sql", "arguments": "{\"sql\":\"SELECT 1\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let completion = parse_chat_response(body).unwrap();
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].function.name, "execute_sql");
        assert!(!completion.is_finished());
        assert_eq!(completion.usage.unwrap().total_tokens, Some(15));
    }

    #[test]
    fn finish_reasons_recognized() {
        let stop = parse_chat_response(
            r#"{"choices":[{"message":{"content":"done"},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert!(stop.is_finished());
        let end_turn = ChatCompletion {
            finish_reason: Some("end_turn".into()),
            ..Default::default()
        };
        assert!(end_turn.is_finished());
    }

    #[test]
    fn api_error_surfaces_as_err() {
        let err = parse_chat_response(r#"{"error":{"message":"rate limited"}}"#).unwrap_err();
        assert!(err.contains("rate limited"));
        assert!(parse_chat_response("not json").is_err());
    }

    #[test]
    fn empty_choices_is_empty_completion() {
        let c = parse_chat_response(r#"{"choices":[]}"#).unwrap();
        assert!(c.content.is_none());
        assert!(c.tool_calls.is_empty());
    }
}

//! Tool abstraction for the orchestration loop.
//!
//! A [`Tool`] is a small capability: it describes itself to the model
//! ([`Tool::definition`]), states which of its operations are safe to run
//! unattended ([`Tool::assess_risk`]), and executes parsed arguments
//! ([`Tool::execute`]). Tools are collected into a [`ToolRegistry`], which
//! maps names to tools, validates arguments against each tool's JSON
//! Schema, and logs dispatch. Adding a tool means registering it; the loop
//! never switches on tool names.

use crate::exec::ExecError;
use crate::{ToolDef, json_schema_for};
use crate::safety::RiskVerdict;
use crate::ui::Ui;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Parsed tool arguments: always a flat JSON object.
pub type ToolArgs = serde_json::Map<String, Value>;

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<ToolSuccess, ToolError>> + Send + 'a>>;

/// What a tool gets to work with besides its arguments.
#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    pub cancel: &'a CancellationToken,
    pub ui: &'a dyn Ui,
}

/// A successful tool run.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSuccess {
    /// JSON payload returned to the model.
    pub payload: Value,
    /// A rendered final artifact (table, chart) to show the user directly.
    /// When present, the model only receives an acknowledgement.
    pub artifact: Option<String>,
}

impl ToolSuccess {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            artifact: None,
        }
    }

    pub fn with_artifact(payload: Value, artifact: impl Into<String>) -> Self {
        Self {
            payload,
            artifact: Some(artifact.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        ToolError::Failed(message.into())
    }
}

impl From<ExecError> for ToolError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Cancelled => ToolError::Cancelled,
            other => ToolError::Failed(other.to_string()),
        }
    }
}

// ── Tool trait ─────────────────────────────────────────────────────

/// A capability the model can invoke via function-calling.
///
/// # Example
///
/// ```ignore
/// struct Clock;
///
/// impl Tool for Clock {
///     fn definition(&self) -> ToolDef {
///         ToolDef::new("clock", "Current time", json!({"type": "object"}))
///     }
///
///     fn assess_risk(&self, _args: &ToolArgs) -> Option<RiskVerdict> {
///         Some(RiskVerdict::low("reads the clock"))
///     }
///
///     fn execute<'a>(&'a self, _args: ToolArgs, _ctx: ToolContext<'a>) -> ToolFuture<'a> {
///         Box::pin(async { Ok(ToolSuccess::new(json!({"now": "12:00"}))) })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The tool definition sent to the model.
    fn definition(&self) -> ToolDef;

    /// The tool's name (delegates to the definition).
    fn name(&self) -> String {
        self.definition().function.name.clone()
    }

    /// Static allow-list check. Return `Some(low)` for operations that are
    /// safe without confirmation and `None` to fall through to the default.
    fn assess_risk(&self, args: &ToolArgs) -> Option<RiskVerdict> {
        let _ = args;
        None
    }

    /// Human-readable description of the call, shown before confirmation.
    fn describe_action(&self, args: &ToolArgs) -> String {
        let rendered = serde_json::to_string_pretty(args).unwrap_or_default();
        format!("{}\n{rendered}", self.name())
    }

    /// Execute with parsed arguments. Boxed so the trait stays dyn-compatible.
    fn execute<'a>(&'a self, args: ToolArgs, ctx: ToolContext<'a>) -> ToolFuture<'a>;
}

// ── ToolRegistry ───────────────────────────────────────────────────

/// Name → tool map with validation and dispatch logging.
///
/// ```ignore
/// let registry = ToolRegistry::new()
///     .with(ExecuteSql::new(backend, executor.clone()))
///     .with(RunCommand::new(executor))
///     .with_if(allow_http, HttpRequest::new()?);
/// let defs = registry.definitions();
/// ```
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    validate_args: bool,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry")
            .field("tools", &names)
            .field("validate_args", &self.validate_args)
            .finish()
    }
}

impl ToolRegistry {
    /// Empty registry with argument validation enabled.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            validate_args: true,
        }
    }

    /// Enable or disable JSON Schema validation before execution.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All definitions, sorted by name so requests are deterministic.
    pub fn definitions(&self) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate, log and execute a call.
    pub async fn execute(
        &self,
        name: &str,
        args: ToolArgs,
        ctx: ToolContext<'_>,
    ) -> Result<ToolSuccess, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::failed(format!("unknown tool '{name}'")))?;

        if self.validate_args {
            validate_tool_arguments(tool, &args).map_err(ToolError::InvalidArguments)?;
        }
        if let Some(task_type) = args.get("task_type").and_then(Value::as_str) {
            debug!("[tool] {name} task_type={task_type}");
        }

        log_tool_call(name, &args);
        let start = std::time::Instant::now();
        let result = tool.execute(args, ctx).await;
        let elapsed = start.elapsed();
        match &result {
            Ok(success) => debug!(
                "Tool {name} completed in {:.0}ms{}",
                elapsed.as_secs_f64() * 1000.0,
                if success.artifact.is_some() {
                    " (artifact)"
                } else {
                    ""
                }
            ),
            Err(e) => debug!(
                "Tool {name} failed after {:.0}ms: {e}",
                elapsed.as_secs_f64() * 1000.0
            ),
        }
        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Default cap on text a tool returns to the model.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 50_000;

/// Argument keys every tool accepts in addition to its own schema.
pub const CROSS_CUTTING_KEYS: &[&str] = &["risk_level", "task_type", "output_mode"];

/// JSON Schema for `T`, extended with the cross-cutting `risk_level` and
/// `task_type` properties so the model knows it may send them.
pub fn tool_parameters<T: JsonSchema>() -> Value {
    let mut schema = json_schema_for::<T>();
    if let Some(props) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        props.insert(
            "risk_level".into(),
            json!({
                "type": "string",
                "enum": ["low", "medium", "high"],
                "description": "Your assessment of how risky this call is. Non-low values require user confirmation."
            }),
        );
        props.insert(
            "task_type".into(),
            json!({
                "type": "string",
                "enum": ["definitive", "exploratory"],
                "description": "'definitive' answers the user directly; 'exploratory' gathers information for you."
            }),
        );
    }
    schema
}

/// Deserialize arguments into a typed struct.
pub fn typed_args<T: DeserializeOwned>(args: ToolArgs) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(args))
        .map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Parse a raw JSON argument string into a flat object.
///
/// An empty string is treated as `{}`.
pub fn parse_arguments(raw: &str) -> Result<ToolArgs, String> {
    if raw.trim().is_empty() {
        return Ok(ToolArgs::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!(
            "arguments must be a JSON object, got {}",
            json_kind(&other)
        )),
        Err(e) => Err(format!("invalid JSON arguments: {e}")),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Validate arguments against the tool's declared JSON Schema.
///
/// Cross-cutting keys are removed first so schemas with
/// `additionalProperties: false` still accept them.
pub fn validate_tool_arguments(tool: &dyn Tool, args: &ToolArgs) -> Result<(), String> {
    let schema = tool.definition().function.parameters;
    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        // An invalid schema is the tool author's problem, not the model's.
        Err(_) => return Ok(()),
    };

    let mut instance = args.clone();
    for key in CROSS_CUTTING_KEYS {
        instance.remove(*key);
    }
    let instance = Value::Object(instance);
    let errors: Vec<String> = validator
        .iter_errors(&instance)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, args: &ToolArgs) {
    let rendered = Value::Object(args.clone()).to_string();
    let preview: String = rendered.chars().take(120).collect();
    info!(
        "[tool] {}({preview}{})",
        name,
        if rendered.len() > 120 { "..." } else { "" }
    );
    trace!("[tool] {name} arguments: {rendered}");
}

/// Truncate a string to at most `max` bytes, appending a notice if trimmed.
pub fn truncate_text(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}...\n[truncated: {} bytes total]",
        s.get(..cut).unwrap_or_default(),
        s.len()
    )
}

/// Read a required string argument.
pub fn required_str<'a>(args: &'a ToolArgs, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing string field '{key}'")))
}

/// Read an optional string argument.
pub fn optional_str<'a>(args: &'a ToolArgs, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::{Confirm, ConfirmFuture, LoadingGuard};
    use serde_json::json;
    use std::time::Duration;

    struct SilentUi;

    impl Confirm for SilentUi {
        fn confirm<'a>(&'a self, _prompt: &'a str) -> ConfirmFuture<'a> {
            Box::pin(async { false })
        }
    }

    impl Ui for SilentUi {
        fn show_loading(&self, _label: &str) -> LoadingGuard {
            LoadingGuard::noop()
        }
        fn display(&self, _artifact: &str) {}
        fn show_action(&self, _description: &str) {}
        fn show_failure(&self, _tool: &str, _message: &str, _elapsed: Option<Duration>) {}
    }

    struct EchoTool;

    impl Tool for EchoTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new(
                "echo",
                "Echo back text",
                json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"],
                    "additionalProperties": false
                }),
            )
        }

        fn execute<'a>(&'a self, args: ToolArgs, _ctx: ToolContext<'a>) -> ToolFuture<'a> {
            Box::pin(async move {
                let text = required_str(&args, "text")?.to_string();
                Ok(ToolSuccess::new(json!({ "echo": text })))
            })
        }
    }

    fn ctx<'a>(cancel: &'a CancellationToken, ui: &'a SilentUi) -> ToolContext<'a> {
        ToolContext { cancel, ui }
    }

    #[test]
    fn tool_name_from_definition() {
        assert_eq!(EchoTool.name(), "echo");
    }

    #[test]
    fn registry_register_and_definitions() {
        let registry = ToolRegistry::new().with(EchoTool);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.definitions()[0].function.name, "echo");
    }

    #[tokio::test]
    async fn registry_executes_known_tool() {
        let registry = ToolRegistry::new().with(EchoTool);
        let cancel = CancellationToken::new();
        let ui = SilentUi;
        let args = parse_arguments(r#"{"text":"hi","risk_level":"low"}"#).unwrap();
        let out = registry.execute("echo", args, ctx(&cancel, &ui)).await.unwrap();
        assert_eq!(out.payload, json!({"echo": "hi"}));
        assert!(out.artifact.is_none());
    }

    #[tokio::test]
    async fn registry_rejects_unknown_tool() {
        let registry = ToolRegistry::new();
        let cancel = CancellationToken::new();
        let ui = SilentUi;
        let err = registry
            .execute("missing", ToolArgs::new(), ctx(&cancel, &ui))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown tool 'missing'"));
    }

    #[tokio::test]
    async fn registry_validates_against_schema() {
        let registry = ToolRegistry::new().with(EchoTool);
        let cancel = CancellationToken::new();
        let ui = SilentUi;
        let args = parse_arguments(r#"{"text": 5}"#).unwrap();
        let err = registry
            .execute("echo", args, ctx(&cancel, &ui))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn parse_arguments_requires_object() {
        assert!(parse_arguments("").unwrap().is_empty());
        assert!(parse_arguments("[1,2]").unwrap_err().contains("an array"));
        assert!(parse_arguments("{broken").unwrap_err().contains("invalid JSON"));
    }

    #[test]
    fn truncate_text_respects_char_boundaries() {
        assert_eq!(truncate_text("short".into(), 10), "short");
        let cut = truncate_text("héllo wörld".into(), 2);
        assert!(cut.starts_with('h'));
        assert!(cut.contains("[truncated: 13 bytes total]"));
    }

    #[derive(serde::Deserialize, JsonSchema)]
    struct PathArgs {
        path: String,
    }

    #[test]
    fn tool_parameters_adds_cross_cutting_keys() {
        let schema = tool_parameters::<PathArgs>();
        assert!(schema["properties"]["path"].is_object());
        assert_eq!(schema["properties"]["risk_level"]["enum"][0], "low");
        assert!(schema["properties"]["task_type"].is_object());
    }

    #[test]
    fn typed_args_reports_invalid_arguments() {
        let args = parse_arguments(r#"{"path": "a.txt", "task_type": "exploratory"}"#).unwrap();
        let parsed: PathArgs = typed_args(args).unwrap();
        assert_eq!(parsed.path, "a.txt");
        let err = typed_args::<PathArgs>(ToolArgs::new()).err().unwrap();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn exec_cancellation_maps_to_tool_cancellation() {
        assert!(matches!(
            ToolError::from(ExecError::Cancelled),
            ToolError::Cancelled
        ));
        assert!(matches!(
            ToolError::from(ExecError::Blocked("rm".into())),
            ToolError::Failed(_)
        ));
    }
}

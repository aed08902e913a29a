//! Configuration for the [`Orchestrator`](super::orchestrator::Orchestrator).
//!
//! Plain data with defaults. Override fields directly or use the builders:
//!
//! ```ignore
//! let config = AgentConfig::default()
//!     .with_model("openai/gpt-4o")
//!     .with_max_iterations(10)
//!     .with_context_window(64_000)
//!     .with_retries(3)
//!     .with_system_prompt("You manage the analytics warehouse.");
//! ```

use crate::DEFAULT_MODEL;
use crate::api::retry::RetryConfig;
use crate::context::{CompressionConfig, DEFAULT_CHARS_PER_TOKEN, DEFAULT_CONTEXT_WINDOW, SummarizerConfig};
use crate::exec::CommandOptions;
use std::path::PathBuf;

/// Default iteration cap per user turn.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Turns a loaded skill may go unused before it is evicted.
pub const DEFAULT_SKILL_EVICTION_WINDOW: usize = 3;

/// Base system prompt. Domain context and skills are appended to it.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a careful operations assistant with access to tools for SQL, shell \
commands, HTTP requests and files.

- Use tools to do what the user asks. Never claim an action happened unless \
a tool result confirms it.
- Call tools one step at a time when later steps depend on earlier results.
- Set `risk_level` on calls that change state, and `task_type` to \
`exploratory` when you need rows back to reason about.
- When a result says it was already displayed, do not repeat it.
- When a tool fails, read `error_type` and `suggested_actions` before retrying.";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub max_iterations: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Retries for model calls. Default: 2 retries.
    pub retry: RetryConfig,
    /// Context window size in tokens.
    pub context_window_tokens: usize,
    pub chars_per_token: f64,
    pub compression: CompressionConfig,
    pub summarizer: SummarizerConfig,
    /// Executor settings shared by every command-backed tool.
    pub command: CommandOptions,
    pub system_prompt: String,
    pub skill_eviction_window: usize,
    /// Where risk decisions are appended. `None` disables the audit log.
    pub audit_log_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: 4096,
            temperature: 0.2,
            retry: RetryConfig::with_retries(2),
            context_window_tokens: DEFAULT_CONTEXT_WINDOW,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            compression: CompressionConfig::default(),
            summarizer: SummarizerConfig::default(),
            command: CommandOptions::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            skill_eviction_window: DEFAULT_SKILL_EVICTION_WINDOW,
            audit_log_path: None,
        }
    }
}

impl AgentConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the iteration cap. Zero is raised to one.
    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n.max(1);
        self
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry = RetryConfig::with_retries(retries);
        self
    }

    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window_tokens = tokens;
        self
    }

    pub fn with_chars_per_token(mut self, ratio: f64) -> Self {
        self.chars_per_token = ratio;
        self
    }

    pub fn with_command_options(mut self, options: CommandOptions) -> Self {
        self.command = options;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_skill_eviction_window(mut self, turns: usize) -> Self {
        self.skill_eviction_window = turns;
        self
    }

    pub fn with_audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log_path = Some(path.into());
        self
    }
}

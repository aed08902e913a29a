//! Convenience re-exports for common `steward-rs` types.
//!
//! ```ignore
//! use steward_rs::prelude::*;
//! ```
//!
//! Covers what a binary needs to wire up a session: the client, the
//! orchestrator and its config, the built-in tools, the UI and audit sinks.
//! Rule and compression internals are left to their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ChatRequest, Message, OpenRouterClient, ToolDef, json_schema_for};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    AgentConfig, AgentError, AgentEvent, CompositeEventHandler, EventHandler, FileSessionStore,
    FnEventHandler, LoggingHandler, NoopHandler, Orchestrator, PriorHistory, SessionStore,
    TurnInput, TurnOutcome,
};
pub use crate::api::{ModelClient, RetryConfig};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{CompressionCache, ContextBudget, InMemorySkills, SkillsProvider};

// ── Safety & execution ──────────────────────────────────────────────
pub use crate::exec::{CommandExecutor, CommandOptions};
pub use crate::safety::{AuditSink, FileAuditLog, NoAudit, RiskLevel};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{
    CommandSqlBackend, ExecuteSql, FileTool, HttpRequest, RenderChart, RenderTable, RunCommand,
    Tool, ToolArgs, ToolContext, ToolFuture, ToolRegistry, ToolSuccess,
};

// ── UI ──────────────────────────────────────────────────────────────
pub use crate::ui::{ConsoleUi, Ui};

pub use tokio_util::sync::CancellationToken;

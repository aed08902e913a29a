//! Events and handlers for the [`Orchestrator`](super::orchestrator::Orchestrator).
//!
//! The orchestrator reports what it is doing through [`AgentEvent`]s. Events
//! are observations only: confirmation goes through the [`Ui`](crate::ui::Ui)
//! port, never through a handler.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use crate::context::{CompressionStep, ContextUsage};
use crate::safety::RiskLevel;
use crate::tools::ToolStatus;
use tracing::{debug, info, warn};

/// Events emitted during one user turn.
#[derive(Debug)]
pub enum AgentEvent<'a> {
    /// A new iteration is starting.
    IterationStart {
        iteration: u32,
        max_iterations: u32,
        context_usage: &'a ContextUsage,
    },
    /// Prior history was compressed before the model call.
    Compressed {
        steps: &'a [CompressionStep],
        usage: &'a ContextUsage,
    },
    /// The model returned text (possibly alongside tool calls).
    Text(&'a str),
    ToolCallsReceived { iteration: u32, count: usize },
    RiskAssessed {
        name: &'a str,
        level: RiskLevel,
        rule: &'a str,
    },
    /// The user declined a high-risk call, or the prompt was cancelled.
    ConfirmationDeclined { name: &'a str },
    ToolExecuting { name: &'a str, arguments: &'a str },
    ToolResult {
        name: &'a str,
        call_id: &'a str,
        status: ToolStatus,
        result: &'a str,
    },
    /// A completion claim with no successful tool behind it was rejected.
    HallucinationRejected { content: &'a str },
    TokenUsage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    /// The turn ended with a final answer.
    Finished,
    IterationLimitReached { max_iterations: u32 },
}

pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &AgentEvent<'_>) {
        let _ = event;
    }
}

pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let AgentEvent::Text(text) = event {
///         println!("{text}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&AgentEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &AgentEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(show_usage, usage_printer);
/// ```
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Maps every event to a `tracing` call.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        match event {
            AgentEvent::IterationStart {
                iteration,
                max_iterations,
                context_usage,
            } => {
                info!(
                    "[iteration {iteration}/{max_iterations}] {}",
                    context_usage.to_log_string()
                );
            }
            AgentEvent::Compressed { steps, usage } => {
                info!(
                    "Compressed context in {} stage(s), now {}",
                    steps.len(),
                    usage.to_log_string()
                );
            }
            AgentEvent::Text(text) => {
                let preview: String = text.chars().take(200).collect();
                debug!(
                    "LLM text: {preview}{}",
                    if text.chars().count() > 200 { "..." } else { "" }
                );
            }
            AgentEvent::ToolCallsReceived { iteration, count } => {
                debug!("{count} tool call(s) in iteration {iteration}");
            }
            AgentEvent::RiskAssessed { name, level, rule } => {
                debug!("Risk for {name}: {level} ({rule})");
            }
            AgentEvent::ConfirmationDeclined { name } => {
                info!("User declined {name}");
            }
            AgentEvent::ToolExecuting { name, .. } => {
                debug!("Executing tool: {name}");
            }
            AgentEvent::ToolResult {
                name,
                status,
                result,
                ..
            } => {
                debug!("Tool {name} {status:?}: {} bytes", result.len());
            }
            AgentEvent::HallucinationRejected { content } => {
                let preview: String = content.chars().take(120).collect();
                warn!("Rejected unverified completion claim: {preview}");
            }
            AgentEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
            } => {
                debug!("Tokens: prompt={prompt_tokens}, completion={completion_tokens}");
            }
            AgentEvent::Finished => {
                info!("Turn finished");
            }
            AgentEvent::IterationLimitReached { max_iterations } => {
                warn!("Iteration limit reached ({max_iterations})");
            }
        }
    }
}

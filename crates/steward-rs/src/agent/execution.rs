//! Per-iteration mechanics: sending the model request and running one tool
//! call through parse, risk, confirmation, dispatch and result shaping.

use super::config::AgentConfig;
use super::error::AgentError;
use super::events::{AgentEvent, EventHandler};
use crate::api::{CallError, ModelClient, retry_call};
use crate::safety::{RiskAssessor, RiskLevel, RiskQuery};
use crate::tools::{ToolContext, ToolError, ToolOutcome, ToolRegistry, parse_arguments};
use crate::ui::Ui;
use crate::{ChatCompletion, ChatRequest, Message, ToolCall, ToolDef};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// ── Send request ──────────────────────────────────────────────────

/// Send one chat request with retries. Cancellation is fatal here.
pub(crate) async fn send_request(
    client: &dyn ModelClient,
    config: &AgentConfig,
    messages: &[Message],
    tools: &[ToolDef],
    cancel: &CancellationToken,
) -> Result<ChatCompletion, AgentError> {
    let body = ChatRequest {
        model: Some(config.model.clone()),
        messages: messages.to_vec(),
        max_tokens: config.max_tokens,
        temperature: config.temperature,
        tools: if tools.is_empty() {
            None
        } else {
            Some(tools.to_vec())
        },
        ..Default::default()
    };
    let chars: usize = messages.iter().map(Message::char_len).sum();
    debug!(
        "Model request: {} message(s), {chars} chars, {} tool(s)",
        messages.len(),
        tools.len()
    );

    let completion = retry_call(&config.retry, cancel, || client.chat(&body))
        .await
        .map_err(|e| match e {
            CallError::Cancelled => AgentError::Cancelled,
            CallError::Failed(msg) => AgentError::Model(msg),
        })?;
    debug!(
        "Model response: {} chars, {} tool call(s), finish={:?}",
        completion.content.as_deref().map_or(0, str::len),
        completion.tool_calls.len(),
        completion.finish_reason
    );
    Ok(completion)
}

// ── Tool calls ────────────────────────────────────────────────────

/// Everything a tool call needs from the orchestrator.
pub(crate) struct CallScope<'a> {
    pub registry: &'a ToolRegistry,
    pub assessor: &'a RiskAssessor<'a>,
    pub ui: &'a dyn Ui,
    pub cancel: &'a CancellationToken,
    pub events: &'a dyn EventHandler,
}

/// Run one tool call to a result. Never fails: every problem becomes an
/// error or cancelled outcome for the model.
pub(crate) async fn process_tool_call(scope: &CallScope<'_>, call: &ToolCall) -> ToolOutcome {
    let name = call.function.name.as_str();
    let args = match parse_arguments(&call.function.arguments) {
        Ok(args) => args,
        Err(e) => {
            warn!("Bad arguments for {name}: {e}");
            return ToolOutcome::error(e);
        }
    };

    let tool = scope.registry.get(name);
    let decision = scope.assessor.assess(&RiskQuery {
        tool_name: name,
        args: &args,
        tool,
    });
    scope.events.on_event(&AgentEvent::RiskAssessed {
        name,
        level: decision.level,
        rule: decision.rule,
    });

    if decision.level == RiskLevel::High {
        let description = match tool {
            Some(t) => t.describe_action(&args),
            None => format!("{name}\n{}", call.function.arguments),
        };
        scope.ui.show_action(&description);
        let prompt = format!("Run {name}?");
        let approved = tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => false,
            answer = scope.ui.confirm(&prompt) => answer,
        };
        if !approved {
            scope
                .events
                .on_event(&AgentEvent::ConfirmationDeclined { name });
            return ToolOutcome::cancelled(format!("The user declined to run {name}."));
        }
    }

    scope.events.on_event(&AgentEvent::ToolExecuting {
        name,
        arguments: &call.function.arguments,
    });
    let ctx = ToolContext {
        cancel: scope.cancel,
        ui: scope.ui,
    };
    let start = Instant::now();
    match scope.registry.execute(name, args, ctx).await {
        Ok(success) => match success.artifact {
            Some(artifact) => {
                scope.ui.display(&artifact);
                ToolOutcome::displayed(Some(&success.payload))
            }
            None => ToolOutcome::success(success.payload),
        },
        Err(ToolError::Cancelled) => {
            let message = format!("{name} was cancelled before it finished");
            scope.ui.show_failure(name, &message, Some(start.elapsed()));
            ToolOutcome::error(message)
        }
        Err(e) => {
            let message = e.to_string();
            scope.ui.show_failure(name, &message, Some(start.elapsed()));
            ToolOutcome::error(message)
        }
    }
}

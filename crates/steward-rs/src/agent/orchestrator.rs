//! The conversation loop for one user turn.
//!
//! ```text
//! AwaitingModel → ExecutingTools → {AwaitingConfirmation | direct} → AwaitingModel → {Done | Failed}
//! ```
//!
//! Each iteration compresses the prior history if the context is too full,
//! calls the model, and runs the requested tool calls in order. Only the
//! model ends a turn: a finish signal with content, or a plain answer that
//! is not an unverified completion claim. The loop gives up after
//! `max_iterations`.
//!
//! The message list is handed back only on success. On a fatal error the
//! caller keeps the history it had.

use super::config::AgentConfig;
use super::error::AgentError;
use super::events::{AgentEvent, EventHandler, NoopHandler};
use super::execution::{CallScope, process_tool_call, send_request};
use super::guard::{CORRECTION_PROMPT, claims_unverified_completion};
use super::session::PriorHistory;
use crate::api::ModelClient;
use crate::context::{
    CompressionCache, CompressionInput, Compressor, ContextBudget, LlmSummarizer, NoSkills,
    SkillItem, SkillsProvider, SummaryDelegate, render_skills,
};
use crate::safety::{AuditSink, RiskAssessor};
use crate::tools::ToolRegistry;
use crate::ui::Ui;
use crate::{Message, MessageRole};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What the caller brings to a turn.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub user_text: String,
    /// Extra context appended to the system prompt (schemas, environment).
    pub domain_context: Option<String>,
    pub prior: PriorHistory,
}

impl TurnInput {
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            ..Default::default()
        }
    }

    pub fn with_domain_context(mut self, context: impl Into<String>) -> Self {
        self.domain_context = Some(context.into());
        self
    }

    pub fn with_prior(mut self, prior: PriorHistory) -> Self {
        self.prior = prior;
        self
    }
}

/// A completed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Final answer. Empty when the results were already shown directly.
    pub text: String,
    /// The last tool result of the turn, as sent to the model.
    pub last_tool_result: Option<Value>,
    /// The full conversation to persist: system prompt, prior history
    /// (possibly compressed) and this turn.
    pub messages: Vec<Message>,
    pub iterations: u32,
}

/// Runs user turns against a model, a tool registry and a user interface.
///
/// Collaborators are borrowed so one set can serve many turns. The
/// compression cache should outlive the turns to be useful; without one a
/// fresh cache is used per turn.
pub struct Orchestrator<'a> {
    client: &'a dyn ModelClient,
    registry: &'a ToolRegistry,
    config: &'a AgentConfig,
    ui: &'a dyn Ui,
    audit: &'a dyn AuditSink,
    cancel: &'a CancellationToken,
    skills: &'a dyn SkillsProvider,
    events: &'a dyn EventHandler,
    cache: Option<&'a CompressionCache>,
    summarizer: Option<&'a dyn SummaryDelegate>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        client: &'a dyn ModelClient,
        registry: &'a ToolRegistry,
        config: &'a AgentConfig,
        ui: &'a dyn Ui,
        audit: &'a dyn AuditSink,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            client,
            registry,
            config,
            ui,
            audit,
            cancel,
            skills: &NoSkills,
            events: &NoopHandler,
            cache: None,
            summarizer: None,
        }
    }

    pub fn with_skills(mut self, skills: &'a dyn SkillsProvider) -> Self {
        self.skills = skills;
        self
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.events = handler;
        self
    }

    pub fn with_compression_cache(mut self, cache: &'a CompressionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace the default model-backed summarizer.
    pub fn with_summarizer(mut self, summarizer: &'a dyn SummaryDelegate) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Run one user turn to a final answer or a fatal error.
    pub async fn run_turn(&self, input: TurnInput) -> Result<TurnOutcome, AgentError> {
        let metadata = self.skills.metadata();
        let names = self.skills.match_skills(&input.user_text, &metadata);
        let skill_items = self.skills.load_skills(&names);
        for name in &names {
            self.skills.track_usage(name, &input.user_text);
        }
        if !skill_items.is_empty() {
            debug!("Loaded skill(s): {names:?}");
        }

        let result = self.run_loop(input, skill_items).await;

        self.skills.evict_unused(self.config.skill_eviction_window);
        match &result {
            Ok(outcome) => info!(
                "Turn finished after {} iteration(s), {} message(s)",
                outcome.iterations,
                outcome.messages.len()
            ),
            Err(e) => info!("Turn failed: {e}"),
        }
        result
    }

    async fn run_loop(
        &self,
        input: TurnInput,
        mut skills: Vec<SkillItem>,
    ) -> Result<TurnOutcome, AgentError> {
        let system_prompt = build_system_prompt(
            &self.config.system_prompt,
            input.domain_context.as_deref(),
        );
        // The fresh system prompt replaces any stored one.
        let mut history: Vec<Message> = input
            .prior
            .into_messages()
            .into_iter()
            .filter(|m| m.role != MessageRole::System)
            .collect();
        let mut current = vec![Message::user(input.user_text.as_str())];

        let local_cache;
        let cache = match self.cache {
            Some(cache) => cache,
            None => {
                local_cache = CompressionCache::default();
                &local_cache
            }
        };
        let default_summarizer;
        let summarizer: &dyn SummaryDelegate = match self.summarizer {
            Some(s) => s,
            None => {
                default_summarizer = LlmSummarizer::new(
                    self.client,
                    &self.config.model,
                    self.config.summarizer.clone(),
                );
                &default_summarizer
            }
        };
        let budget = ContextBudget::new(self.config.context_window_tokens)
            .with_chars_per_token(self.config.chars_per_token);
        let compressor = Compressor::new(budget, cache)
            .with_config(self.config.compression.clone())
            .with_delegate(summarizer);

        let assessor = RiskAssessor::new(self.audit);
        let scope = CallScope {
            registry: self.registry,
            assessor: &assessor,
            ui: self.ui,
            cancel: self.cancel,
            events: self.events,
        };
        let tools = self.registry.definitions();
        let max_iterations = self.config.max_iterations;
        let mut tool_succeeded = false;
        let mut last_tool_result: Option<Value> = None;

        for iteration in 1..=max_iterations {
            let compression_input = CompressionInput {
                system_prompt: &system_prompt,
                history: &history,
                current: &current,
                skills: &skills,
            };
            let usage = compressor.usage(&system_prompt, &history, &current, &skills);
            self.events.on_event(&AgentEvent::IterationStart {
                iteration,
                max_iterations,
                context_usage: &usage,
            });

            if compressor.needs_compression(&compression_input) {
                let result = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                    r = compressor.compress(compression_input) => r,
                };
                self.events.on_event(&AgentEvent::Compressed {
                    steps: &result.steps,
                    usage: &result.usage,
                });
                history = result.compressed_history;
                skills = result.remaining_auxiliary_items;
            }

            let messages = assemble(&system_prompt, &skills, &history, &current);
            let loading = self.ui.show_loading("Thinking");
            let response =
                send_request(self.client, self.config, &messages, &tools, self.cancel).await;
            loading.stop();
            let completion = response?;

            if let Some(usage) = &completion.usage {
                self.events.on_event(&AgentEvent::TokenUsage {
                    prompt_tokens: usage.prompt_tokens.unwrap_or(0),
                    completion_tokens: usage.completion_tokens.unwrap_or(0),
                });
            }
            let content = completion.content.clone().unwrap_or_default();
            if !content.trim().is_empty() {
                self.events.on_event(&AgentEvent::Text(&content));
            }

            if completion.tool_calls.is_empty() {
                if completion.is_finished() {
                    if content.trim().is_empty() && !tool_succeeded {
                        return Err(AgentError::EmptyResponse);
                    }
                } else if claims_unverified_completion(&input.user_text, &content, tool_succeeded)
                {
                    self.events
                        .on_event(&AgentEvent::HallucinationRejected { content: &content });
                    current.push(Message::assistant_text(content));
                    current.push(Message::system(CORRECTION_PROMPT));
                    continue;
                }

                if !content.is_empty() {
                    current.push(Message::assistant_text(content.as_str()));
                }
                self.events.on_event(&AgentEvent::Finished);
                let mut messages = Vec::with_capacity(1 + history.len() + current.len());
                messages.push(Message::system(system_prompt));
                messages.extend(history);
                messages.extend(current);
                return Ok(TurnOutcome {
                    text: content,
                    last_tool_result,
                    messages,
                    iterations: iteration,
                });
            }

            self.events.on_event(&AgentEvent::ToolCallsReceived {
                iteration,
                count: completion.tool_calls.len(),
            });
            current.push(Message::assistant_tool_calls(
                completion.content,
                completion.tool_calls.clone(),
            ));
            for call in &completion.tool_calls {
                let outcome = process_tool_call(&scope, call).await;
                tool_succeeded |= outcome.is_success();
                let rendered = outcome.content.to_string();
                self.events.on_event(&AgentEvent::ToolResult {
                    name: &call.function.name,
                    call_id: &call.id,
                    status: outcome.status,
                    result: &rendered,
                });
                current.push(outcome.to_message(&call.id));
                last_tool_result = Some(outcome.content);
            }
        }

        self.events
            .on_event(&AgentEvent::IterationLimitReached { max_iterations });
        Err(AgentError::MaxIterations(max_iterations))
    }
}

/// Base prompt plus the caller's domain context.
fn build_system_prompt(base: &str, domain_context: Option<&str>) -> String {
    match domain_context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => format!("{base}\n\n# Context\n{context}"),
        None => base.to_string(),
    }
}

/// The message list sent to the model.
fn assemble(
    system_prompt: &str,
    skills: &[SkillItem],
    history: &[Message],
    current: &[Message],
) -> Vec<Message> {
    let rendered = render_skills(skills);
    let system = if rendered.is_empty() {
        system_prompt.to_string()
    } else {
        format!("{system_prompt}\n\n{rendered}")
    };
    let mut messages = Vec::with_capacity(1 + history.len() + current.len());
    messages.push(Message::system(system));
    messages.extend_from_slice(history);
    messages.extend_from_slice(current);
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChatFuture;
    use crate::context::{InMemorySkills, SkillPriority, SummaryFuture, SummaryKind};
    use crate::safety::MemoryAudit;
    use crate::tools::{ExecuteSql, SqlBackend, SqlOutput, ToolContext, ToolError};
    use crate::tools::sql::SqlFuture;
    use crate::ui::{Confirm, ConfirmFuture, LoadingGuard};
    use crate::{ChatCompletion, ChatRequest, ToolCall, UsageInfo};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    // ── Scripted collaborators ─────────────────────────────────────

    #[derive(Default)]
    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<ChatCompletion, String>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<ChatCompletion, String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ModelClient for ScriptedClient {
        fn chat<'a>(&'a self, request: &'a ChatRequest) -> ChatFuture<'a> {
            self.requests.lock().unwrap().push(request.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(tool_reply(vec![ToolCall::new("loop", "lookup", "{}")])));
            Box::pin(async move { reply })
        }
    }

    #[derive(Default)]
    struct ScriptedUi {
        answers: Mutex<VecDeque<bool>>,
        prompts: Mutex<Vec<String>>,
        actions: Mutex<Vec<String>>,
        displayed: Mutex<Vec<String>>,
        failures: Mutex<Vec<String>>,
    }

    impl ScriptedUi {
        fn answering(answers: &[bool]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().copied().collect()),
                ..Default::default()
            }
        }
    }

    impl Confirm for ScriptedUi {
        fn confirm<'a>(&'a self, prompt: &'a str) -> ConfirmFuture<'a> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let answer = self.answers.lock().unwrap().pop_front().unwrap_or(false);
            Box::pin(async move { answer })
        }
    }

    impl Ui for ScriptedUi {
        fn show_loading(&self, _label: &str) -> LoadingGuard {
            LoadingGuard::noop()
        }
        fn display(&self, artifact: &str) {
            self.displayed.lock().unwrap().push(artifact.to_string());
        }
        fn show_action(&self, description: &str) {
            self.actions.lock().unwrap().push(description.to_string());
        }
        fn show_failure(&self, tool: &str, message: &str, _elapsed: Option<Duration>) {
            self.failures.lock().unwrap().push(format!("{tool}: {message}"));
        }
    }

    #[derive(Default)]
    struct FakeDb {
        executed: Mutex<Vec<String>>,
    }

    impl SqlBackend for FakeDb {
        fn execute<'a>(&'a self, sql: &'a str, _ctx: ToolContext<'a>) -> SqlFuture<'a> {
            self.executed.lock().unwrap().push(sql.to_string());
            Box::pin(async move {
                if sql.trim_start().to_ascii_uppercase().starts_with("SELECT") {
                    Ok(SqlOutput {
                        columns: vec!["count".into()],
                        rows: vec![vec!["42".into()]],
                    })
                } else if sql.contains("missing") {
                    Err(ToolError::failed("Table 'shop.missing' doesn't exist"))
                } else {
                    Ok(SqlOutput::default())
                }
            })
        }
    }

    fn tool_reply(calls: Vec<ToolCall>) -> ChatCompletion {
        ChatCompletion {
            tool_calls: calls,
            finish_reason: Some("tool_calls".into()),
            ..Default::default()
        }
    }

    fn finish(text: &str) -> ChatCompletion {
        ChatCompletion {
            content: Some(text.into()),
            finish_reason: Some("stop".into()),
            usage: Some(UsageInfo {
                prompt_tokens: Some(100),
                completion_tokens: Some(10),
                total_tokens: Some(110),
            }),
            ..Default::default()
        }
    }

    fn unfinished(text: &str) -> ChatCompletion {
        ChatCompletion {
            content: Some(text.into()),
            finish_reason: None,
            ..Default::default()
        }
    }

    fn sql_call(id: &str, sql: &str) -> ToolCall {
        ToolCall::new(id, "execute_sql", serde_json::json!({ "sql": sql }).to_string())
    }

    struct Fixture {
        db: Arc<FakeDb>,
        registry: ToolRegistry,
        config: AgentConfig,
        audit: MemoryAudit,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            let db = Arc::new(FakeDb::default());
            let registry = ToolRegistry::new().with(ExecuteSql::new(db.clone()));
            Self {
                db,
                registry,
                config: AgentConfig::default().with_retries(0),
                audit: MemoryAudit::default(),
                cancel: CancellationToken::new(),
            }
        }

        fn orchestrator<'a>(&'a self, client: &'a ScriptedClient, ui: &'a ScriptedUi) -> Orchestrator<'a> {
            Orchestrator::new(client, &self.registry, &self.config, ui, &self.audit, &self.cancel)
        }
    }

    fn tool_results(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .map(|m| serde_json::from_str(m.text()).unwrap())
            .collect()
    }

    // ── Loop scenarios ─────────────────────────────────────────────

    #[tokio::test]
    async fn low_risk_call_then_finish_returns_content() {
        let h = Fixture::new();
        let client = ScriptedClient::new(vec![
            Ok(tool_reply(vec![sql_call("c1", "SELECT COUNT(*) FROM users")])),
            Ok(finish("There are 42 users.")),
        ]);
        let ui = ScriptedUi::default();
        let outcome = h
            .orchestrator(&client, &ui)
            .run_turn(TurnInput::new("How many users are there?"))
            .await
            .unwrap();

        assert_eq!(outcome.text, "There are 42 users.");
        assert_eq!(outcome.iterations, 2);
        // Low risk: no confirmation, table shown directly.
        assert!(ui.prompts.lock().unwrap().is_empty());
        assert_eq!(ui.displayed.lock().unwrap().len(), 1);
        assert!(ui.displayed.lock().unwrap()[0].contains("42"));

        let last = outcome.last_tool_result.unwrap();
        assert_eq!(last["status"], "success");
        assert!(last["message"].as_str().unwrap().contains("already been displayed"));

        // system, user, assistant(tool call), tool, assistant
        let roles: Vec<_> = outcome.messages.iter().map(|m| m.role.clone()).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::Tool,
                MessageRole::Assistant
            ]
        );
        assert_eq!(h.audit.lines().len(), 1);
        assert!(h.audit.lines()[0].contains("decision=low"));
    }

    #[tokio::test]
    async fn finish_without_content_or_tool_is_empty_response() {
        let h = Fixture::new();
        let client = ScriptedClient::new(vec![Ok(finish(""))]);
        let ui = ScriptedUi::default();
        let err = h
            .orchestrator(&client, &ui)
            .run_turn(TurnInput::new("hello"))
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::EmptyResponse);
    }

    #[tokio::test]
    async fn finish_without_content_after_success_is_ok() {
        let h = Fixture::new();
        let client = ScriptedClient::new(vec![
            Ok(tool_reply(vec![sql_call("c1", "SELECT 1")])),
            Ok(finish("")),
        ]);
        let ui = ScriptedUi::default();
        let outcome = h
            .orchestrator(&client, &ui)
            .run_turn(TurnInput::new("show me one"))
            .await
            .unwrap();
        assert_eq!(outcome.text, "");
    }

    #[tokio::test]
    async fn never_finishing_hits_iteration_cap() {
        let h = Fixture::new();
        // Every reply is a (failing, unknown) tool call.
        let client = ScriptedClient::new(Vec::new());
        let ui = ScriptedUi::default();
        let err = h
            .orchestrator(&client, &ui)
            .run_turn(TurnInput::new("keep going"))
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::MaxIterations(10));
        assert_eq!(client.requests().len(), 10);
    }

    #[tokio::test]
    async fn declined_drop_is_cancelled_and_loop_continues() {
        let h = Fixture::new();
        let client = ScriptedClient::new(vec![
            Ok(tool_reply(vec![sql_call("c1", "DROP TABLE users")])),
            Ok(finish("Okay, I left the users table alone.")),
        ]);
        let ui = ScriptedUi::answering(&[false]);
        let outcome = h
            .orchestrator(&client, &ui)
            .run_turn(TurnInput::new("drop the users table"))
            .await
            .unwrap();

        assert_eq!(outcome.text, "Okay, I left the users table alone.");
        assert!(h.db.executed.lock().unwrap().is_empty());
        assert_eq!(ui.actions.lock().unwrap()[0], "Execute SQL:\n  DROP TABLE users");
        assert_eq!(ui.prompts.lock().unwrap().len(), 1);
        let results = tool_results(&outcome.messages);
        assert_eq!(results[0]["status"], "cancelled");

        // The model saw the cancelled result before answering.
        let second = &client.requests()[1];
        assert_eq!(second.messages.last().unwrap().role, MessageRole::Tool);
    }

    #[tokio::test]
    async fn accepted_high_risk_call_executes() {
        let h = Fixture::new();
        let client = ScriptedClient::new(vec![
            Ok(tool_reply(vec![sql_call("c1", "DELETE FROM sessions")])),
            Ok(finish("Deleted.")),
        ]);
        let ui = ScriptedUi::answering(&[true]);
        h.orchestrator(&client, &ui)
            .run_turn(TurnInput::new("delete all sessions"))
            .await
            .unwrap();
        assert_eq!(*h.db.executed.lock().unwrap(), vec!["DELETE FROM sessions"]);
    }

    #[tokio::test]
    async fn explicit_low_hint_skips_confirmation() {
        let h = Fixture::new();
        let call = ToolCall::new(
            "c1",
            "execute_sql",
            r#"{"sql":"DROP TABLE scratch","risk_level":"low"}"#,
        );
        let client = ScriptedClient::new(vec![Ok(tool_reply(vec![call])), Ok(finish("Dropped."))]);
        let ui = ScriptedUi::default();
        h.orchestrator(&client, &ui)
            .run_turn(TurnInput::new("drop scratch"))
            .await
            .unwrap();
        assert!(ui.prompts.lock().unwrap().is_empty());
        assert_eq!(*h.db.executed.lock().unwrap(), vec!["DROP TABLE scratch"]);
    }

    // ── Tool-call handling ─────────────────────────────────────────

    #[tokio::test]
    async fn bad_arguments_become_error_result() {
        let h = Fixture::new();
        let client = ScriptedClient::new(vec![
            Ok(tool_reply(vec![ToolCall::new("c1", "execute_sql", "{not json")])),
            Ok(finish("Sorry.")),
        ]);
        let ui = ScriptedUi::default();
        let outcome = h
            .orchestrator(&client, &ui)
            .run_turn(TurnInput::new("count users"))
            .await
            .unwrap();
        let results = tool_results(&outcome.messages);
        assert_eq!(results[0]["status"], "error");
        assert!(h.audit.lines().is_empty());
    }

    #[tokio::test]
    async fn failures_are_classified_and_shown() {
        let h = Fixture::new();
        let client = ScriptedClient::new(vec![
            Ok(tool_reply(vec![ToolCall::new(
                "c1",
                "execute_sql",
                r#"{"sql":"TRUNCATE missing","risk_level":"low"}"#,
            )])),
            Ok(finish("That table does not exist.")),
        ]);
        let ui = ScriptedUi::default();
        let outcome = h
            .orchestrator(&client, &ui)
            .run_turn(TurnInput::new("empty the missing table"))
            .await
            .unwrap();
        let result = outcome.last_tool_result.unwrap();
        assert_eq!(result["status"], "error");
        assert_eq!(result["error_type"], "resource_not_found");
        assert_eq!(ui.failures.lock().unwrap().len(), 1);
        assert!(ui.failures.lock().unwrap()[0].starts_with("execute_sql: "));
    }

    #[tokio::test]
    async fn results_follow_call_order() {
        let h = Fixture::new();
        let client = ScriptedClient::new(vec![
            Ok(tool_reply(vec![
                sql_call("a", "SELECT 1"),
                sql_call("b", "CREATE TABLE t (id INT)"),
                ToolCall::new("c", "no_such_tool", "{}"),
            ])),
            Ok(finish("Done.")),
        ]);
        let ui = ScriptedUi::answering(&[true]);
        let outcome = h
            .orchestrator(&client, &ui)
            .run_turn(TurnInput::new("make a table"))
            .await
            .unwrap();
        let ids: Vec<_> = outcome
            .messages
            .iter()
            .filter_map(|m| m.tool_call_id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        // The unknown tool defaulted to high risk and was confirmed, then failed.
        assert_eq!(ui.prompts.lock().unwrap().len(), 1);
        assert_eq!(tool_results(&outcome.messages)[2]["status"], "error");
    }

    // ── Hallucination guard ────────────────────────────────────────

    #[tokio::test]
    async fn unverified_claim_is_rejected_then_corrected() {
        let h = Fixture::new();
        let client = ScriptedClient::new(vec![
            Ok(unfinished("The table has been dropped successfully.")),
            Ok(tool_reply(vec![ToolCall::new(
                "c1",
                "execute_sql",
                r#"{"sql":"DROP TABLE old","risk_level":"low"}"#,
            )])),
            Ok(finish("Dropped table old.")),
        ]);
        let ui = ScriptedUi::default();
        let outcome = h
            .orchestrator(&client, &ui)
            .run_turn(TurnInput::new("DROP the old table"))
            .await
            .unwrap();
        assert_eq!(outcome.text, "Dropped table old.");
        let second = &client.requests()[1];
        let last = second.messages.last().unwrap();
        assert_eq!(last.role, MessageRole::System);
        assert_eq!(last.text(), CORRECTION_PROMPT);
    }

    #[tokio::test]
    async fn plain_answer_without_finish_is_returned() {
        let h = Fixture::new();
        let client = ScriptedClient::new(vec![Ok(unfinished("A foreign key links two tables."))]);
        let ui = ScriptedUi::default();
        let outcome = h
            .orchestrator(&client, &ui)
            .run_turn(TurnInput::new("what is a foreign key?"))
            .await
            .unwrap();
        assert_eq!(outcome.text, "A foreign key links two tables.");
    }

    // ── Fatal errors ───────────────────────────────────────────────

    #[tokio::test]
    async fn model_failure_is_fatal() {
        let h = Fixture::new();
        let client = ScriptedClient::new(vec![Err("OpenRouter API HTTP 401: bad key".into())]);
        let ui = ScriptedUi::default();
        let err = h
            .orchestrator(&client, &ui)
            .run_turn(TurnInput::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Model(ref m) if m.contains("401")));
    }

    #[tokio::test]
    async fn cancelled_before_model_call_is_fatal() {
        let h = Fixture::new();
        h.cancel.cancel();
        let client = ScriptedClient::new(vec![Ok(finish("never"))]);
        let ui = ScriptedUi::default();
        let err = h
            .orchestrator(&client, &ui)
            .run_turn(TurnInput::new("hi"))
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::Cancelled);
    }

    #[tokio::test]
    async fn cancel_during_running_tool_becomes_error_result() {
        use crate::agent::events::FnEventHandler;
        use crate::exec::{CommandExecutor, CommandOptions};
        use crate::tools::{CommandSqlBackend, ToolStatus};

        let mut h = Fixture::new();
        let slow_client = CommandSqlBackend::new("sleep 5", CommandExecutor::new(CommandOptions::default()));
        h.registry = ToolRegistry::new().with(ExecuteSql::new(Arc::new(slow_client)));

        let client = ScriptedClient::new(vec![
            Ok(tool_reply(vec![sql_call("c1", "SELECT * FROM orders")])),
            Ok(finish("never reached")),
        ]);
        let ui = ScriptedUi::default();
        let results = Mutex::new(Vec::new());
        let handler = FnEventHandler::new(|event: &AgentEvent<'_>| {
            if let AgentEvent::ToolResult { status, result, .. } = event {
                results.lock().unwrap().push((*status, result.to_string()));
            }
        });

        let trigger = h.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let err = h
            .orchestrator(&client, &ui)
            .with_event_handler(&handler)
            .run_turn(TurnInput::new("show all orders"))
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(4));
        // The tool result is recorded first; the next model call then stops the turn.
        assert_eq!(err, AgentError::Cancelled);
        let results = results.lock().unwrap().clone();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, ToolStatus::Error);
        let content: Value = serde_json::from_str(&results[0].1).unwrap();
        assert_eq!(content["status"], "error");
        assert!(
            content.to_string().contains("execute_sql was cancelled before it finished"),
            "{content}"
        );
        assert_eq!(
            *ui.failures.lock().unwrap(),
            vec!["execute_sql: execute_sql was cancelled before it finished".to_string()]
        );
        assert_eq!(client.requests().len(), 1);
    }

    // ── History, context and skills ────────────────────────────────

    #[tokio::test]
    async fn prior_history_and_domain_context_are_sent() {
        let h = Fixture::new();
        let client = ScriptedClient::new(vec![Ok(finish("Still 42."))]);
        let ui = ScriptedUi::default();
        let prior = PriorHistory::Structured(vec![
            Message::system("stale prompt"),
            Message::user("count users"),
            Message::assistant_text("42"),
        ]);
        let outcome = h
            .orchestrator(&client, &ui)
            .run_turn(
                TurnInput::new("and now?")
                    .with_domain_context("Database: shop (MySQL 8)")
                    .with_prior(prior),
            )
            .await
            .unwrap();
        let sent = &client.requests()[0].messages;
        assert_eq!(sent.len(), 4);
        assert!(sent[0].text().ends_with("# Context\nDatabase: shop (MySQL 8)"));
        assert!(!sent.iter().any(|m| m.text() == "stale prompt"));
        assert_eq!(outcome.messages.len(), 5);
        assert_eq!(
            outcome
                .messages
                .iter()
                .filter(|m| m.role == MessageRole::System)
                .count(),
            1
        );
    }

    struct TinySummary;

    impl SummaryDelegate for TinySummary {
        fn summarize<'a>(&'a self, _kind: SummaryKind, _content: &'a str, _target: usize) -> SummaryFuture<'a> {
            Box::pin(async { Ok("user counted rows twice".to_string()) })
        }
    }

    #[tokio::test]
    async fn full_context_is_compressed_before_model_call() {
        let mut h = Fixture::new();
        h.config = h.config.with_context_window(200).with_system_prompt("sys");
        let client = ScriptedClient::new(vec![Ok(finish("ok"))]);
        let ui = ScriptedUi::default();
        let cache = CompressionCache::default();
        let prior: Vec<Message> = (0..20)
            .map(|i| Message::user(format!("message {i} {}", "x".repeat(100))))
            .collect();
        let outcome = h
            .orchestrator(&client, &ui)
            .with_summarizer(&TinySummary)
            .with_compression_cache(&cache)
            .run_turn(TurnInput::new("summarize").with_prior(PriorHistory::Structured(prior)))
            .await
            .unwrap();
        let sent = &client.requests()[0].messages;
        // system, summary, user
        assert_eq!(sent.len(), 3);
        assert!(sent[1].text().starts_with("[Summary of 20 earlier messages]"));
        assert_eq!(sent[2].text(), "summarize");
        assert_eq!(cache.len(), 1);
        assert_eq!(outcome.messages.len(), 4);
    }

    #[tokio::test]
    async fn matched_skills_are_rendered_into_system_prompt() {
        let h = Fixture::new();
        let skills = InMemorySkills::new().with_skill(
            "mysql",
            "MySQL conventions",
            "Always qualify table names.",
            SkillPriority::Relevant,
        );
        let client = ScriptedClient::new(vec![Ok(finish("ok"))]);
        let ui = ScriptedUi::default();
        h.orchestrator(&client, &ui)
            .with_skills(&skills)
            .run_turn(TurnInput::new("list mysql tables"))
            .await
            .unwrap();
        let system = client.requests()[0].messages[0].text().to_string();
        assert!(system.contains("## mysql\nAlways qualify table names."));
        assert_eq!(skills.loaded(), vec!["mysql"]);
    }
}

//! Summarization delegate used by the compressor.
//!
//! A [`SummaryDelegate`] shrinks a block of text toward a target size.
//! [`LlmSummarizer`] does it with a one-shot model call and rejects summaries
//! that do not reduce the input by at least `min_reduction_fraction`, so the
//! compressor falls back to truncation instead of keeping a useless summary.

use crate::api::ModelClient;
use crate::{ChatRequest, Message};
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

const HISTORY_PROMPT: &str = "\
Summarize the following conversation between a user and a data assistant. Focus on:
- What the user asked for and what was accomplished
- Tables, files, commands and queries involved, with their outcomes
- Errors encountered and how they were resolved
- Anything the user stated as a preference or constraint

Rules:
- Only include facts explicitly stated in the messages. Do not infer or extrapolate.
- Preserve identifiers (table, column, file and host names) and error codes verbatim.
- Stay under the requested length.";

const SKILL_PROMPT: &str = "\
Condense the following instructions while keeping every rule, command and identifier \
they contain. Drop examples and explanations first. Stay under the requested length.";

/// What is being summarized. Selects the prompt and separates cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    History,
    Skill,
}

impl SummaryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SummaryKind::History => "history",
            SummaryKind::Skill => "skill",
        }
    }
}

/// Boxed future returned by [`SummaryDelegate::summarize`].
pub type SummaryFuture<'a> = Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>>;

pub trait SummaryDelegate: Send + Sync {
    /// Shrink `content` to roughly `target_chars` characters.
    fn summarize<'a>(
        &'a self,
        kind: SummaryKind,
        content: &'a str,
        target_chars: usize,
    ) -> SummaryFuture<'a>;
}

/// Configuration for model-backed summarization.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Model to use for summarization. `None` uses the main model.
    pub model: Option<String>,
    /// Maximum tokens for the summarization response.
    pub max_summary_tokens: u32,
    /// Minimum reduction for a summary to count as a success.
    pub min_reduction_fraction: f64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_summary_tokens: 2048,
            min_reduction_fraction: 0.20,
        }
    }
}

/// Build the (system, user) prompt pair for one summarization call.
pub fn build_summarization_request(
    kind: SummaryKind,
    content: &str,
    target_chars: usize,
) -> (String, String) {
    let system = match kind {
        SummaryKind::History => HISTORY_PROMPT,
        SummaryKind::Skill => SKILL_PROMPT,
    };
    let user = format!("Target length: at most {target_chars} characters.\n\n{content}");
    (system.to_string(), user)
}

/// Render messages as `[role]: text` blocks for summarization.
pub fn transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        let text = msg.content.as_deref().unwrap_or("");
        out.push_str(&format!("[{}]: {text}", msg.role));
        if let Some(calls) = &msg.tool_calls {
            for call in calls {
                out.push_str(&format!(
                    "\n  -> {}({})",
                    call.function.name, call.function.arguments
                ));
            }
        }
        out.push_str("\n\n");
    }
    out
}

/// Summarizes with a one-shot model call.
pub struct LlmSummarizer<'a> {
    client: &'a dyn ModelClient,
    model: String,
    config: SummarizerConfig,
}

impl<'a> LlmSummarizer<'a> {
    pub fn new(client: &'a dyn ModelClient, main_model: &str, config: SummarizerConfig) -> Self {
        let model = config.model.clone().unwrap_or_else(|| main_model.to_string());
        Self {
            client,
            model,
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl SummaryDelegate for LlmSummarizer<'_> {
    fn summarize<'b>(
        &'b self,
        kind: SummaryKind,
        content: &'b str,
        target_chars: usize,
    ) -> SummaryFuture<'b> {
        Box::pin(async move {
            let (system, user) = build_summarization_request(kind, content, target_chars);
            let request = ChatRequest {
                model: Some(self.model.clone()),
                messages: vec![Message::system(system), Message::user(user)],
                max_tokens: self.config.max_summary_tokens,
                temperature: 0.2,
                ..Default::default()
            };
            let completion = self.client.chat(&request).await?;
            let summary = completion.content.unwrap_or_default().trim().to_string();
            check_reduction(content.len(), &summary, self.config.min_reduction_fraction)?;
            debug!(
                "[compress] summarized {} {} chars -> {}",
                kind.as_str(),
                content.len(),
                summary.len()
            );
            Ok(summary)
        })
    }
}

/// Reject empty summaries and summaries that did not shrink enough.
pub fn check_reduction(original: usize, summary: &str, min_fraction: f64) -> Result<(), String> {
    if summary.is_empty() {
        return Err("summarizer returned empty text".into());
    }
    let ceiling = original as f64 * (1.0 - min_fraction);
    if summary.len() as f64 > ceiling {
        return Err(format!(
            "summary of {} chars did not reduce {original} chars by {:.0}%",
            summary.len(),
            min_fraction * 100.0
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatCompletion;
    use crate::api::ChatFuture;
    use std::sync::Mutex;

    struct CannedClient {
        reply: String,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl ModelClient for CannedClient {
        fn chat<'a>(&'a self, request: &'a ChatRequest) -> ChatFuture<'a> {
            self.seen.lock().unwrap().push(request.clone());
            let reply = self.reply.clone();
            Box::pin(async move {
                Ok(ChatCompletion {
                    content: Some(reply),
                    finish_reason: Some("stop".into()),
                    ..Default::default()
                })
            })
        }
    }

    #[test]
    fn request_carries_target_and_content() {
        let (system, user) = build_summarization_request(SummaryKind::History, "abc", 10);
        assert!(system.contains("Summarize"));
        assert!(user.starts_with("Target length: at most 10 characters."));
        assert!(user.ends_with("abc"));
        let (skill_system, _) = build_summarization_request(SummaryKind::Skill, "abc", 10);
        assert!(skill_system.contains("Condense"));
    }

    #[test]
    fn transcript_includes_roles_and_calls() {
        let msgs = vec![
            Message::user("count users"),
            Message::assistant_tool_calls(
                None,
                vec![crate::ToolCall::new("c1", "execute_sql", r#"{"sql":"SELECT 1"}"#)],
            ),
            Message::tool_result("c1", "1"),
        ];
        let text = transcript(&msgs);
        assert!(text.contains("[user]: count users"));
        assert!(text.contains("-> execute_sql({\"sql\":\"SELECT 1\"})"));
        assert!(text.contains("[tool]: 1"));
    }

    #[test]
    fn reduction_check() {
        assert!(check_reduction(100, "x", 0.2).is_ok());
        assert!(check_reduction(100, &"x".repeat(80), 0.2).is_ok());
        assert!(check_reduction(100, &"x".repeat(81), 0.2).is_err());
        assert!(check_reduction(100, "", 0.2).is_err());
    }

    #[tokio::test]
    async fn llm_summarizer_uses_configured_model() {
        let client = CannedClient {
            reply: "short".into(),
            seen: Mutex::new(Vec::new()),
        };
        let config = SummarizerConfig {
            model: Some("cheap/model".into()),
            ..Default::default()
        };
        let summarizer = LlmSummarizer::new(&client, "main/model", config);
        let summary = summarizer
            .summarize(SummaryKind::History, &"long text ".repeat(20), 50)
            .await
            .unwrap();
        assert_eq!(summary, "short");
        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].model.as_deref(), Some("cheap/model"));
    }

    #[tokio::test]
    async fn llm_summarizer_rejects_non_reducing_summary() {
        let client = CannedClient {
            reply: "this reply is as long as the input".into(),
            seen: Mutex::new(Vec::new()),
        };
        let summarizer = LlmSummarizer::new(&client, "main/model", SummarizerConfig::default());
        assert_eq!(summarizer.model(), "main/model");
        let err = summarizer
            .summarize(SummaryKind::Skill, "short input", 5)
            .await
            .unwrap_err();
        assert!(err.contains("did not reduce"));
    }
}

//! Context budget estimation.
//!
//! Usage is a cheap proxy: characters divided by a chars-per-token ratio.
//! It only needs to grow with prompt size, not match any tokenizer.

use crate::Message;
use crate::context::skills::{SkillItem, skills_chars};

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Default context window size in tokens.
pub const DEFAULT_CONTEXT_WINDOW: usize = 128_000;

/// Estimates how full the context window is.
///
/// # Example
///
/// ```ignore
/// let budget = ContextBudget::new(128_000).with_chars_per_token(4.0);
/// let usage = budget.estimate_usage(system_prompt, &history, user_text, &skills);
/// if usage.usage_pct >= 0.8 {
///     // compress
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ContextBudget {
    max_tokens: usize,
    chars_per_token: f64,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_WINDOW)
    }
}

impl ContextBudget {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }

    /// Override the ratio. Non-positive values fall back to the default.
    pub fn with_chars_per_token(mut self, ratio: f64) -> Self {
        self.chars_per_token = if ratio > 0.0 {
            ratio
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        self
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn tokens_for_chars(&self, chars: usize) -> usize {
        (chars as f64 / self.chars_per_token) as usize
    }

    /// Usage of system prompt + skills + joined history + current input.
    pub fn estimate_usage(
        &self,
        system_prompt: &str,
        history: &[Message],
        input: &str,
        skills: &[SkillItem],
    ) -> ContextUsage {
        let total_chars =
            system_prompt.len() + history_chars(history) + input.len() + skills_chars(skills);
        let estimated_tokens = self.tokens_for_chars(total_chars);
        let usage_pct = if self.max_tokens > 0 {
            estimated_tokens as f64 / self.max_tokens as f64
        } else {
            1.0
        };
        ContextUsage {
            estimated_tokens,
            max_tokens: self.max_tokens,
            usage_pct,
        }
    }
}

/// Characters of the history joined with newlines.
pub fn history_chars(history: &[Message]) -> usize {
    let content: usize = history.iter().map(Message::char_len).sum();
    content + history.len().saturating_sub(1)
}

/// Snapshot of context usage at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextUsage {
    pub estimated_tokens: usize,
    pub max_tokens: usize,
    /// Usage as a fraction (0.0 to 1.0+).
    pub usage_pct: f64,
}

impl ContextUsage {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens ({:.0}% of {})",
            self.estimated_tokens,
            self.usage_pct * 100.0,
            self.max_tokens,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::skills::SkillPriority;

    #[test]
    fn usage_counts_every_part() {
        let budget = ContextBudget::new(1_000).with_chars_per_token(1.0);
        let history = vec![Message::user("a".repeat(100)), Message::assistant_text("b".repeat(100))];
        let skills = vec![SkillItem::new("s", "c".repeat(99), SkillPriority::Relevant)];
        let usage = budget.estimate_usage(&"x".repeat(100), &history, &"y".repeat(100), &skills);
        // 100 system + 201 history + 100 input + 100 skills
        assert_eq!(usage.estimated_tokens, 501);
        assert!((usage.usage_pct - 0.501).abs() < 1e-9);
    }

    #[test]
    fn default_ratio_is_three_and_a_half() {
        let budget = ContextBudget::new(100);
        assert_eq!(budget.tokens_for_chars(35), 10);
        let fallback = ContextBudget::new(100).with_chars_per_token(0.0);
        assert_eq!(fallback.tokens_for_chars(35), 10);
    }

    #[test]
    fn zero_window_reads_as_full() {
        let usage = ContextBudget::new(0).estimate_usage("", &[], "", &[]);
        assert_eq!(usage.usage_pct, 1.0);
    }

    #[test]
    fn usage_log_string_format() {
        let usage = ContextBudget::new(1000).estimate_usage("hello world", &[], "", &[]);
        let log = usage.to_log_string();
        assert!(log.contains("context:"));
        assert!(log.contains("tokens"));
    }
}

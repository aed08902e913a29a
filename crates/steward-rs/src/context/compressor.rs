//! Cascading context compression.
//!
//! Usage is checked against three thresholds. Each stage re-estimates usage
//! after the previous one, so a single call can run all three:
//!
//! | Usage | History | Skills |
//! |-------|---------|--------|
//! | ≥ 80% | summarize toward 50%, else keep the last 10 | unchanged |
//! | ≥ 90% | summarize toward 30%, else keep the last 5 | drop below `Relevant` |
//! | ≥ 95% | summarize toward 20%, else keep the last 3 | condense each, keep only the top tier |
//!
//! Summaries go through a [`SummaryDelegate`] and are memoized in a
//! [`CompressionCache`]. Delegate failures never surface; they fall back to
//! truncation. Below the first threshold the inputs come back untouched.

use crate::context::budget::{ContextBudget, ContextUsage};
use crate::context::cache::CompressionCache;
use crate::context::skills::{SkillItem, SkillPriority};
use crate::context::summarizer::{SummaryDelegate, SummaryKind, transcript};
use crate::{Message, MessageRole};
use tracing::{debug, info, warn};

/// One threshold stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionStage {
    /// Usage fraction at which the stage runs.
    pub threshold: f64,
    /// Summary size as a fraction of the original.
    pub summary_target: f64,
    /// Messages kept when summarization fails.
    pub keep_last: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressionConfig {
    pub warning: CompressionStage,
    pub high: CompressionStage,
    pub critical: CompressionStage,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            warning: CompressionStage {
                threshold: 0.80,
                summary_target: 0.50,
                keep_last: 10,
            },
            high: CompressionStage {
                threshold: 0.90,
                summary_target: 0.30,
                keep_last: 5,
            },
            critical: CompressionStage {
                threshold: 0.95,
                summary_target: 0.20,
                keep_last: 3,
            },
        }
    }
}

/// How a stage shrank the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Summarized,
    Truncated,
}

/// Record of one stage that ran.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionStep {
    pub threshold: f64,
    pub method: CompressionMethod,
    pub messages_before: usize,
    pub messages_after: usize,
    pub skills_evicted: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressionResult {
    pub compressed_history: Vec<Message>,
    pub remaining_auxiliary_items: Vec<SkillItem>,
    pub compressed: bool,
    pub steps: Vec<CompressionStep>,
    /// Usage after the last stage (or the untouched usage).
    pub usage: ContextUsage,
}

/// What the compressor looks at.
///
/// `current` is this turn's messages: counted against the budget but never
/// compressed.
#[derive(Debug, Clone, Copy)]
pub struct CompressionInput<'a> {
    pub system_prompt: &'a str,
    pub history: &'a [Message],
    pub current: &'a [Message],
    pub skills: &'a [SkillItem],
}

pub struct Compressor<'a> {
    budget: ContextBudget,
    config: CompressionConfig,
    delegate: Option<&'a dyn SummaryDelegate>,
    cache: &'a CompressionCache,
}

impl<'a> Compressor<'a> {
    pub fn new(budget: ContextBudget, cache: &'a CompressionCache) -> Self {
        Self {
            budget,
            config: CompressionConfig::default(),
            delegate: None,
            cache,
        }
    }

    pub fn with_config(mut self, config: CompressionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_delegate(mut self, delegate: &'a dyn SummaryDelegate) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn budget(&self) -> &ContextBudget {
        &self.budget
    }

    pub fn usage(&self, system: &str, history: &[Message], current: &[Message], skills: &[SkillItem]) -> ContextUsage {
        let current_text = transcript(current);
        self.budget
            .estimate_usage(system, history, &current_text, skills)
    }

    /// Whether [`compress`](Self::compress) would do anything.
    pub fn needs_compression(&self, input: &CompressionInput<'_>) -> bool {
        self.usage(input.system_prompt, input.history, input.current, input.skills)
            .usage_pct
            >= self.config.warning.threshold
    }

    pub async fn compress(&self, input: CompressionInput<'_>) -> CompressionResult {
        let mut history = input.history.to_vec();
        let mut skills = input.skills.to_vec();
        let mut steps = Vec::new();
        let measure = |h: &[Message], s: &[SkillItem]| {
            self.usage(input.system_prompt, h, input.current, s)
        };

        let mut usage = measure(&history, &skills);
        if usage.usage_pct < self.config.warning.threshold {
            return CompressionResult {
                compressed_history: history,
                remaining_auxiliary_items: skills,
                compressed: false,
                steps,
                usage,
            };
        }
        info!("[compress] {} over threshold", usage.to_log_string());

        let stages = [self.config.warning, self.config.high, self.config.critical];
        for (i, stage) in stages.iter().enumerate() {
            if usage.usage_pct < stage.threshold {
                break;
            }
            let before = history.len();
            let (shrunk, method) = self
                .shrink_history(std::mem::take(&mut history), stage)
                .await;
            history = shrunk;

            let skills_before = skills.len();
            match i {
                0 => {}
                1 => skills.retain(|s| s.priority >= SkillPriority::Relevant),
                _ => {
                    for skill in &mut skills {
                        skill.content = self
                            .shrink_text(SummaryKind::Skill, &skill.content, stage.summary_target)
                            .await;
                    }
                    if let Some(top) = skills.iter().map(|s| s.priority).max() {
                        skills.retain(|s| s.priority == top);
                    }
                }
            }

            usage = measure(&history, &skills);
            debug!(
                "[compress] stage {:.0}%: {method:?} {before} -> {} messages, {} skill(s) evicted, now {}",
                stage.threshold * 100.0,
                history.len(),
                skills_before - skills.len(),
                usage.to_log_string()
            );
            steps.push(CompressionStep {
                threshold: stage.threshold,
                method,
                messages_before: before,
                messages_after: history.len(),
                skills_evicted: skills_before - skills.len(),
            });
        }

        CompressionResult {
            compressed_history: history,
            remaining_auxiliary_items: skills,
            compressed: true,
            steps,
            usage,
        }
    }

    async fn shrink_history(
        &self,
        history: Vec<Message>,
        stage: &CompressionStage,
    ) -> (Vec<Message>, CompressionMethod) {
        if !history.is_empty() {
            let text = transcript(&history);
            if let Some(summary) = self
                .summarize(SummaryKind::History, &text, stage.summary_target)
                .await
            {
                let message = Message::user(format!(
                    "[Summary of {} earlier messages]\n{summary}",
                    represented(&history)
                ));
                return (vec![message], CompressionMethod::Summarized);
            }
        }
        (
            truncate_history(history, stage.keep_last),
            CompressionMethod::Truncated,
        )
    }

    async fn shrink_text(&self, kind: SummaryKind, text: &str, target: f64) -> String {
        match self.summarize(kind, text, target).await {
            Some(summary) => summary,
            None => truncate_chars(text, target_chars(text.len(), target)),
        }
    }

    /// Summarize through the cache. `None` on any failure.
    async fn summarize(&self, kind: SummaryKind, text: &str, target: f64) -> Option<String> {
        let delegate = self.delegate?;
        let key = CompressionCache::key(kind.as_str(), target, text);
        if let Some(hit) = self.cache.get(key) {
            return Some(hit);
        }
        match delegate
            .summarize(kind, text, target_chars(text.len(), target))
            .await
        {
            Ok(summary) => {
                self.cache.insert(key, summary.clone());
                Some(summary)
            }
            Err(e) => {
                warn!("[compress] {} summarization failed, truncating: {e}", kind.as_str());
                None
            }
        }
    }
}

fn target_chars(len: usize, fraction: f64) -> usize {
    ((len as f64) * fraction).ceil() as usize
}

/// Keep the last `keep` messages behind a single marker.
///
/// Tool results whose assistant call was cut off are dropped too, so the
/// kept window never starts with an orphaned Tool message.
pub fn truncate_history(history: Vec<Message>, keep: usize) -> Vec<Message> {
    if history.len() <= keep {
        return history;
    }
    let mut kept = history;
    let cut = kept.len() - keep;
    let dropped_head: Vec<Message> = kept.drain(..cut).collect();
    let orphans = kept
        .iter()
        .take_while(|m| m.role == MessageRole::Tool)
        .count();
    let dropped_orphans: Vec<Message> = kept.drain(..orphans).collect();
    let dropped = represented(&dropped_head) + represented(&dropped_orphans);
    let mut out = Vec::with_capacity(kept.len() + 1);
    out.push(compression_marker(dropped));
    out.extend(kept);
    out
}

pub fn compression_marker(dropped: usize) -> Message {
    Message::user(format!("[{dropped} earlier messages compressed]"))
}

/// Original messages a slice stands for, counting through earlier markers
/// and summaries.
fn represented(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| folded_count(m.text()).unwrap_or(1))
        .sum()
}

fn folded_count(text: &str) -> Option<usize> {
    let count = if let Some(rest) = text.strip_prefix("[Summary of ") {
        rest.split_once(" earlier messages]")?.0
    } else {
        text.strip_prefix('[')?
            .strip_suffix(" earlier messages compressed]")?
    };
    count.parse().ok()
}

/// Cut `text` to at most `max` bytes on a char boundary, marking the cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", text.get(..cut).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;
    use crate::context::summarizer::SummaryFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingDelegate(AtomicUsize);

    impl SummaryDelegate for FailingDelegate {
        fn summarize<'a>(&'a self, _kind: SummaryKind, _content: &'a str, _target: usize) -> SummaryFuture<'a> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err("model unavailable".to_string()) })
        }
    }

    struct ShortDelegate(AtomicUsize);

    impl SummaryDelegate for ShortDelegate {
        fn summarize<'a>(&'a self, _kind: SummaryKind, _content: &'a str, _target: usize) -> SummaryFuture<'a> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok("summary".to_string()) })
        }
    }

    fn history(n: usize, size: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("{i}:{}", "u".repeat(size)))
                } else {
                    Message::assistant_text(format!("{i}:{}", "a".repeat(size)))
                }
            })
            .collect()
    }

    fn input<'a>(h: &'a [Message], skills: &'a [SkillItem]) -> CompressionInput<'a> {
        CompressionInput {
            system_prompt: "system",
            history: h,
            current: &[],
            skills,
        }
    }

    #[tokio::test]
    async fn below_threshold_is_noop() {
        let cache = CompressionCache::default();
        let compressor = Compressor::new(ContextBudget::new(100_000), &cache);
        let h = history(4, 10);
        let result = compressor.compress(input(&h, &[])).await;
        assert!(!result.compressed);
        assert_eq!(result.compressed_history, h);
        assert!(result.steps.is_empty());
        assert!(!compressor.needs_compression(&input(&h, &[])));
    }

    #[tokio::test]
    async fn critical_path_keeps_at_most_three_plus_marker() {
        let cache = CompressionCache::default();
        let delegate = FailingDelegate(AtomicUsize::new(0));
        // 40 messages of ~100 chars on a 100-token window: far over 95%.
        let compressor = Compressor::new(ContextBudget::new(100), &cache).with_delegate(&delegate);
        let h = history(40, 100);
        let result = compressor.compress(input(&h, &[])).await;
        assert!(result.compressed);
        assert_eq!(result.steps.len(), 3);
        assert!(result.steps.iter().all(|s| s.method == CompressionMethod::Truncated));
        let kept: Vec<_> = result
            .compressed_history
            .iter()
            .filter(|m| !m.text().ends_with("earlier messages compressed]"))
            .collect();
        assert!(kept.len() <= 3);
        assert_eq!(result.compressed_history[0].text(), "[37 earlier messages compressed]");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn successful_summary_is_cached() {
        let cache = CompressionCache::default();
        let delegate = ShortDelegate(AtomicUsize::new(0));
        let compressor = Compressor::new(ContextBudget::new(300).with_chars_per_token(1.0), &cache)
            .with_delegate(&delegate);
        // ~250 chars of history on a 300-token window: only the 80% stage runs.
        let h = history(2, 120);
        let first = compressor.compress(input(&h, &[])).await;
        assert_eq!(first.steps.len(), 1);
        assert_eq!(first.steps[0].method, CompressionMethod::Summarized);
        assert_eq!(first.compressed_history.len(), 1);
        assert!(first.compressed_history[0].text().contains("summary"));

        let second = compressor.compress(input(&h, &[])).await;
        assert_eq!(second.compressed_history, first.compressed_history);
        assert_eq!(delegate.0.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn skills_evicted_by_tier() {
        let cache = CompressionCache::default();
        let compressor = Compressor::new(ContextBudget::new(10), &cache);
        let skills = vec![
            SkillItem::new("critical", "c".repeat(50), SkillPriority::Critical),
            SkillItem::new("relevant", "r".repeat(50), SkillPriority::Relevant),
            SkillItem::new("optional", "o".repeat(50), SkillPriority::Optional),
        ];
        let h = history(2, 100);
        let result = compressor.compress(input(&h, &skills)).await;
        let names: Vec<_> = result
            .remaining_auxiliary_items
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["critical"]);
        // Condensed to ~20% by truncation.
        assert!(result.remaining_auxiliary_items[0].content.len() <= 11 + "…".len());
        assert_eq!(result.steps[1].skills_evicted, 1);
        assert_eq!(result.steps[2].skills_evicted, 1);
    }

    #[tokio::test]
    async fn ninety_percent_stage_stops_short_of_critical() {
        let cache = CompressionCache::default();
        let compressor = Compressor::new(ContextBudget::new(1000).with_chars_per_token(1.0), &cache);
        let skills = vec![
            SkillItem::new("schema", "s".repeat(200), SkillPriority::Critical),
            SkillItem::new("joins", "j".repeat(100), SkillPriority::Relevant),
            SkillItem::new("charts", "c".repeat(80), SkillPriority::Optional),
        ];
        // 6 + 529 + 206 + 105 + 86 = 932 chars: 93.2% on a 1000-token window.
        let h = history(10, 50);
        let before = compressor.usage("system", &h, &[], &skills);
        assert!((0.90..0.95).contains(&before.usage_pct));

        let result = compressor.compress(input(&h, &skills)).await;
        assert!(result.compressed);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[1].threshold, 0.90);
        assert_eq!(result.steps[1].messages_before, 10);
        assert_eq!(result.steps[1].messages_after, 6);
        assert_eq!(result.steps[1].skills_evicted, 1);
        assert!(result.usage.usage_pct < 0.95);

        assert_eq!(result.compressed_history[0].text(), "[5 earlier messages compressed]");
        assert_eq!(&result.compressed_history[1..], &h[5..]);
        // Kept skills are not condensed; that only happens at 95%.
        assert_eq!(result.remaining_auxiliary_items, skills[..2].to_vec());
    }

    #[test]
    fn truncation_drops_orphaned_tool_results() {
        let mut h = history(6, 5);
        h.push(Message::assistant_tool_calls(
            None,
            vec![ToolCall::new("c1", "execute_sql", "{}")],
        ));
        h.push(Message::tool_result("c1", "ok"));
        h.push(Message::tool_result("c2", "ok"));
        h.push(Message::assistant_text("done"));
        // Last 3 = [tool c1, tool c2, assistant]; both tool results are orphans.
        let out = truncate_history(h, 3);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text(), "[9 earlier messages compressed]");
        assert_eq!(out[1].text(), "done");
    }

    #[test]
    fn truncation_is_noop_for_short_history() {
        let h = history(3, 5);
        assert_eq!(truncate_history(h.clone(), 5), h);
    }

    #[test]
    fn truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "h…");
        assert_eq!(truncate_chars("abc", 5), "abc");
    }
}

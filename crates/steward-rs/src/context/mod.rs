//! Context window management: budget estimation, compression, and skills.
//!
//! Before every model call the orchestrator estimates how full the context
//! window is ([`budget`]) and, past 80%, runs the [`compressor`] cascade.
//! Summaries come from a [`summarizer`] delegate and are memoized in the
//! [`cache`]. Skills ([`skills`]) are the auxiliary prompt items that get
//! evicted first under pressure.

pub mod budget;
pub mod cache;
pub mod compressor;
pub mod skills;
pub mod summarizer;

pub use budget::{ContextBudget, ContextUsage, DEFAULT_CHARS_PER_TOKEN, DEFAULT_CONTEXT_WINDOW};
pub use cache::CompressionCache;
pub use compressor::{
    CompressionConfig, CompressionInput, CompressionMethod, CompressionResult, CompressionStage,
    CompressionStep, Compressor,
};
pub use skills::{
    InMemorySkills, NoSkills, SkillItem, SkillMetadata, SkillPriority, SkillsProvider,
    render_skills,
};
pub use summarizer::{LlmSummarizer, SummarizerConfig, SummaryDelegate, SummaryFuture, SummaryKind};

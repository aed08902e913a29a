//! Skills: optional instruction snippets loaded into the system prompt.
//!
//! The engine only loads, tracks and evicts skills through
//! [`SkillsProvider`]. Relevance matching lives in the provider.
//! [`InMemorySkills`] is a small keyword-matching provider; [`NoSkills`]
//! disables the feature.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Priority tier. Ordered so that `Critical` is the highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillPriority {
    Optional,
    Relevant,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillMetadata {
    pub name: String,
    pub description: String,
    pub priority: SkillPriority,
}

/// A loaded skill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillItem {
    pub name: String,
    pub content: String,
    pub priority: SkillPriority,
}

impl SkillItem {
    pub fn new(name: impl Into<String>, content: impl Into<String>, priority: SkillPriority) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            priority,
        }
    }
}

pub trait SkillsProvider: Send + Sync {
    fn metadata(&self) -> Vec<SkillMetadata>;

    /// Names of the skills relevant to `query`.
    fn match_skills(&self, query: &str, metadata: &[SkillMetadata]) -> Vec<String>;

    fn load_skills(&self, names: &[String]) -> Vec<SkillItem>;

    /// Unload skills unused for `window` turns; returns their names.
    fn evict_unused(&self, window: usize) -> Vec<String>;

    fn track_usage(&self, name: &str, query: &str);

    fn set_priority(&self, name: &str, tier: SkillPriority);
}

/// A provider with no skills.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSkills;

impl SkillsProvider for NoSkills {
    fn metadata(&self) -> Vec<SkillMetadata> {
        Vec::new()
    }
    fn match_skills(&self, _query: &str, _metadata: &[SkillMetadata]) -> Vec<String> {
        Vec::new()
    }
    fn load_skills(&self, _names: &[String]) -> Vec<SkillItem> {
        Vec::new()
    }
    fn evict_unused(&self, _window: usize) -> Vec<String> {
        Vec::new()
    }
    fn track_usage(&self, _name: &str, _query: &str) {}
    fn set_priority(&self, _name: &str, _tier: SkillPriority) {}
}

/// Render loaded skills as a system-prompt section.
pub fn render_skills(items: &[SkillItem]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut out = String::from("# Skills\n");
    for item in items {
        out.push_str(&format!("\n## {}\n{}\n", item.name, item.content.trim_end()));
    }
    out
}

/// Total characters of skill content.
pub fn skills_chars(items: &[SkillItem]) -> usize {
    items.iter().map(|i| i.name.len() + i.content.len()).sum()
}

// ── InMemorySkills ─────────────────────────────────────────────────

struct SkillEntry {
    description: String,
    content: String,
    priority: SkillPriority,
    loaded: bool,
    /// Turn of last use, or `None` if never used since loading.
    last_used: Option<u64>,
}

struct SkillState {
    skills: HashMap<String, SkillEntry>,
    turn: u64,
}

/// Keyword-matched skills held in memory.
///
/// A skill matches when its name, or any description word of four or more
/// letters, appears in the query (case-insensitive). Every
/// [`track_usage`](SkillsProvider::track_usage) call stamps the current
/// turn; [`evict_unused`](SkillsProvider::evict_unused) advances the turn
/// counter and unloads skills idle for longer than the window.
pub struct InMemorySkills {
    state: Mutex<SkillState>,
}

impl Default for InMemorySkills {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySkills {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SkillState {
                skills: HashMap::new(),
                turn: 0,
            }),
        }
    }

    pub fn with_skill(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        content: impl Into<String>,
        priority: SkillPriority,
    ) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.skills.insert(
                name.into(),
                SkillEntry {
                    description: description.into(),
                    content: content.into(),
                    priority,
                    loaded: false,
                    last_used: None,
                },
            );
        }
        self
    }

    /// Load every `*.md` file in `dir`. The file stem is the name, the first
    /// non-empty line the description, the whole file the content.
    pub fn from_dir(dir: &Path) -> std::io::Result<Self> {
        let mut skills = Self::new();
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
            .collect();
        paths.sort();
        for path in paths {
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let content = std::fs::read_to_string(&path)?;
            let description = content
                .lines()
                .map(|l| l.trim_start_matches('#').trim())
                .find(|l| !l.is_empty())
                .unwrap_or_default()
                .to_string();
            skills = skills.with_skill(name, description, content, SkillPriority::Relevant);
        }
        Ok(skills)
    }

    pub fn loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .map(|s| {
                s.skills
                    .iter()
                    .filter(|(_, e)| e.loaded)
                    .map(|(n, _)| n.clone())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl SkillsProvider for InMemorySkills {
    fn metadata(&self) -> Vec<SkillMetadata> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut out: Vec<SkillMetadata> = state
            .skills
            .iter()
            .map(|(name, e)| SkillMetadata {
                name: name.clone(),
                description: e.description.clone(),
                priority: e.priority,
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    fn match_skills(&self, query: &str, metadata: &[SkillMetadata]) -> Vec<String> {
        let query = query.to_lowercase();
        metadata
            .iter()
            .filter(|m| {
                query.contains(&m.name.to_lowercase())
                    || m.description
                        .to_lowercase()
                        .split(|c: char| !c.is_alphanumeric())
                        .filter(|w| w.len() >= 4)
                        .any(|w| query.contains(w))
            })
            .map(|m| m.name.clone())
            .collect()
    }

    fn load_skills(&self, names: &[String]) -> Vec<SkillItem> {
        let Ok(mut state) = self.state.lock() else {
            return Vec::new();
        };
        let mut items = Vec::new();
        for name in names {
            if let Some(entry) = state.skills.get_mut(name) {
                entry.loaded = true;
                items.push(SkillItem::new(name, &entry.content, entry.priority));
            }
        }
        items
    }

    fn evict_unused(&self, window: usize) -> Vec<String> {
        let Ok(mut state) = self.state.lock() else {
            return Vec::new();
        };
        state.turn += 1;
        let turn = state.turn;
        let mut evicted = Vec::new();
        for (name, entry) in state.skills.iter_mut() {
            let idle = turn.saturating_sub(entry.last_used.unwrap_or(0));
            if entry.loaded && entry.priority != SkillPriority::Critical && idle > window as u64 {
                entry.loaded = false;
                evicted.push(name.clone());
            }
        }
        evicted.sort();
        if !evicted.is_empty() {
            debug!("[skills] evicted {evicted:?}");
        }
        evicted
    }

    fn track_usage(&self, name: &str, query: &str) {
        if let Ok(mut state) = self.state.lock() {
            let turn = state.turn + 1;
            if let Some(entry) = state.skills.get_mut(name) {
                entry.last_used = Some(turn);
                debug!("[skills] {name} used for {:?}", query.chars().take(60).collect::<String>());
            }
        }
    }

    fn set_priority(&self, name: &str, tier: SkillPriority) {
        if let Ok(mut state) = self.state.lock()
            && let Some(entry) = state.skills.get_mut(name)
        {
            entry.priority = tier;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> InMemorySkills {
        InMemorySkills::new()
            .with_skill(
                "postgres",
                "Postgres catalog queries",
                "Use information_schema.",
                SkillPriority::Relevant,
            )
            .with_skill(
                "charts",
                "Plotting sales figures",
                "Prefer render_chart.",
                SkillPriority::Optional,
            )
    }

    #[test]
    fn priority_ordering() {
        assert!(SkillPriority::Critical > SkillPriority::Relevant);
        assert!(SkillPriority::Relevant > SkillPriority::Optional);
    }

    #[test]
    fn matches_by_name_or_description_word() {
        let p = provider();
        let meta = p.metadata();
        assert_eq!(p.match_skills("list postgres tables", &meta), vec!["postgres"]);
        assert_eq!(p.match_skills("show me SALES by region", &meta), vec!["charts"]);
        assert!(p.match_skills("hello", &meta).is_empty());
    }

    #[test]
    fn unused_skills_are_evicted_after_window() {
        let p = provider();
        p.load_skills(&["postgres".into(), "charts".into()]);
        p.track_usage("postgres", "q");
        assert!(p.evict_unused(1).is_empty());

        // Turn 2: charts was never used, postgres last used in turn 1.
        p.track_usage("postgres", "q");
        assert_eq!(p.evict_unused(1), vec!["charts"]);
        assert_eq!(p.loaded(), vec!["postgres"]);
    }

    #[test]
    fn critical_skills_are_never_evicted() {
        let p = provider();
        p.set_priority("charts", SkillPriority::Critical);
        p.load_skills(&["charts".into()]);
        for _ in 0..5 {
            assert!(p.evict_unused(0).is_empty());
        }
    }

    #[test]
    fn render_lists_each_skill() {
        let text = render_skills(&[SkillItem::new("a", "alpha\n", SkillPriority::Relevant)]);
        assert_eq!(text, "# Skills\n\n## a\nalpha\n");
        assert!(render_skills(&[]).is_empty());
    }

    #[test]
    fn loads_markdown_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("joins.md"), "# Writing joins\nUse explicit JOIN.").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let p = InMemorySkills::from_dir(dir.path()).unwrap();
        let meta = p.metadata();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].description, "Writing joins");
    }
}

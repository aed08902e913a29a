//! Conversation persistence between turns.
//!
//! A [`SessionStore`] hands the orchestrator its prior history and takes the
//! updated message list back after a successful turn. [`FileSessionStore`]
//! keeps one JSON file:
//!
//! ```text
//! {"version": 1, "messages": [ <Message>, ... ]}
//! ```
//!
//! Older files are a flat `[{"role": ..., "content": ...}]` array. They are
//! still read, as [`PriorHistory::Legacy`], and are rewritten in the full
//! format on the next save.

use crate::{Message, MessageRole};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session file {path} is not valid: {message}")]
    Parse { path: PathBuf, message: String },
}

/// One entry of the flattened legacy format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyEntry {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// History from a previous turn, in whichever shape it was stored.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PriorHistory {
    #[default]
    Empty,
    Structured(Vec<Message>),
    Legacy(Vec<LegacyEntry>),
}

impl PriorHistory {
    /// Convert to messages with at most one System message, placed first.
    ///
    /// Legacy entries with an unknown role, or a `tool` role (which has no
    /// call id to pair with), are dropped.
    pub fn into_messages(self) -> Vec<Message> {
        let messages = match self {
            PriorHistory::Empty => Vec::new(),
            PriorHistory::Structured(messages) => messages,
            PriorHistory::Legacy(entries) => entries
                .into_iter()
                .filter_map(|e| match e.role.to_ascii_lowercase().as_str() {
                    "system" => Some(Message::system(e.content)),
                    "user" => Some(Message::user(e.content)),
                    "assistant" => Some(Message::assistant_text(e.content)),
                    other => {
                        debug!("Skipping legacy history entry with role '{other}'");
                        None
                    }
                })
                .collect(),
        };
        normalize_system(messages)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            PriorHistory::Empty => true,
            PriorHistory::Structured(m) => m.is_empty(),
            PriorHistory::Legacy(e) => e.is_empty(),
        }
    }
}

/// Keep only the most recent System message, moved to the front.
pub fn normalize_system(messages: Vec<Message>) -> Vec<Message> {
    let mut system = None;
    let mut rest = Vec::with_capacity(messages.len());
    for msg in messages {
        if msg.role == MessageRole::System {
            system = Some(msg);
        } else {
            rest.push(msg);
        }
    }
    match system {
        Some(s) => std::iter::once(s).chain(rest).collect(),
        None => rest,
    }
}

pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<PriorHistory, SessionError>;
    fn save(&self, messages: &[Message]) -> Result<(), SessionError>;
}

#[derive(Serialize, Deserialize)]
struct SessionFile {
    version: u32,
    messages: Vec<Message>,
}

/// JSON file session store with atomic writes.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> SessionError {
        SessionError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session.json".into());
        self.path.with_file_name(format!(".{name}.tmp"))
    }
}

impl SessionStore for FileSessionStore {
    /// A missing file is an empty history.
    fn load(&self) -> Result<PriorHistory, SessionError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PriorHistory::Empty),
            Err(e) => return Err(self.io_err(e)),
        };
        if text.trim().is_empty() {
            return Ok(PriorHistory::Empty);
        }

        match serde_json::from_str::<SessionFile>(&text) {
            Ok(file) => {
                if file.version != FORMAT_VERSION {
                    warn!(
                        "Session file {} has version {}, expected {FORMAT_VERSION}",
                        self.path.display(),
                        file.version
                    );
                }
                let messages = normalize_system(file.messages);
                debug!("Loaded {} message(s) from {}", messages.len(), self.path.display());
                Ok(PriorHistory::Structured(messages))
            }
            Err(full_err) => match serde_json::from_str::<Vec<LegacyEntry>>(&text) {
                Ok(entries) => {
                    debug!(
                        "Loaded {} legacy entries from {}",
                        entries.len(),
                        self.path.display()
                    );
                    Ok(PriorHistory::Legacy(entries))
                }
                Err(_) => Err(SessionError::Parse {
                    path: self.path.clone(),
                    message: full_err.to_string(),
                }),
            },
        }
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    fn save(&self, messages: &[Message]) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let file = SessionFile {
            version: FORMAT_VERSION,
            messages: messages.to_vec(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| SessionError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, json).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        debug!("Saved {} message(s) to {}", messages.len(), self.path.display());
        Ok(())
    }
}

//! Append-only audit trail of risk decisions.
//!
//! The orchestrator's composition root owns the sink and lends it to the
//! [`RiskAssessor`](super::risk::RiskAssessor). [`FileAuditLog`] does no I/O
//! until the first record, so constructing one for a session that never
//! calls a tool leaves the filesystem untouched.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Write-only destination for audit lines.
pub trait AuditSink: Send + Sync {
    /// Record one decision. Implementations prefix the timestamp.
    fn record(&self, message: &str);
}

/// Format an audit line: `[<timestamp>] <message>`.
pub fn format_line(message: &str) -> String {
    format!("[{}] {message}", Local::now().format("%Y-%m-%d %H:%M:%S"))
}

/// Audit sink that appends to a file, opened on first use.
#[derive(Debug)]
pub struct FileAuditLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> std::io::Result<File> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&self.path)
    }
}

impl AuditSink for FileAuditLog {
    fn record(&self, message: &str) {
        let Ok(mut guard) = self.file.lock() else {
            return;
        };
        if guard.is_none() {
            match self.open() {
                Ok(f) => *guard = Some(f),
                Err(e) => {
                    warn!("Failed to open audit log {}: {e}", self.path.display());
                    return;
                }
            }
        }
        if let Some(file) = guard.as_mut()
            && let Err(e) = writeln!(file, "{}", format_line(message))
        {
            warn!("Failed to write audit log {}: {e}", self.path.display());
        }
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAudit;

impl AuditSink for NoAudit {
    fn record(&self, _message: &str) {}
}

/// Keeps formatted lines in memory. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    lines: Mutex<Vec<String>>,
}

impl MemoryAudit {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(format_line(message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_is_not_created_until_first_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("audit.log");
        let log = FileAuditLog::new(&path);
        assert!(!path.exists());

        log.record("tool=execute_sql decision=low");
        log.record("tool=run_command decision=high");
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] tool=execute_sql decision=low"));
    }

    #[test]
    fn appends_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        FileAuditLog::new(&path).record("first");
        FileAuditLog::new(&path).record("second");
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn memory_audit_collects_lines() {
        let audit = MemoryAudit::default();
        audit.record("hello");
        assert_eq!(audit.lines().len(), 1);
        assert!(audit.lines()[0].ends_with("hello"));
    }
}

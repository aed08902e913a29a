//! `file`: read and write files under a root directory.
//!
//! Paths are relative to the root. Absolute paths and `..` components are
//! refused before any filesystem access.

use crate::ToolDef;
use crate::safety::{RiskVerdict, file_op_is_read_only};
use crate::tools::core::{
    DEFAULT_MAX_RESULT_BYTES, Tool, ToolArgs, ToolContext, ToolError, ToolFuture, ToolSuccess,
    optional_str, tool_parameters, truncate_text, typed_args,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Longest directory listing returned.
const MAX_LIST_ENTRIES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Read,
    List,
    Exists,
    Write,
    Append,
    Delete,
}

#[derive(Deserialize, JsonSchema)]
pub struct FileArgs {
    /// What to do with the path.
    pub operation: FileOperation,
    /// Path relative to the working directory, e.g. 'reports/q3.csv'.
    pub path: String,
    /// Text for write and append.
    #[serde(default)]
    pub content: Option<String>,
}

/// Resolve `relative` under `root`, refusing anything that could escape it.
pub fn resolve_under(root: &Path, relative: &str) -> Result<PathBuf, ToolError> {
    let rel = Path::new(relative.trim());
    if rel.as_os_str().is_empty() {
        return Err(ToolError::InvalidArguments("path is empty".into()));
    }
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(ToolError::InvalidArguments(
                    "path traversal not allowed".into(),
                ));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ToolError::InvalidArguments(
                    "absolute paths not allowed".into(),
                ));
            }
        }
    }
    Ok(root.join(rel))
}

/// File operations confined to one directory.
#[derive(Debug, Clone)]
pub struct FileTool {
    root: PathBuf,
    max_read_bytes: usize,
}

impl FileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_read_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }

    pub fn max_read_bytes(mut self, max: usize) -> Self {
        self.max_read_bytes = max;
        self
    }

    async fn list(&self, path: &Path, shown: &str) -> Result<ToolSuccess, ToolError> {
        let mut dir = fs::read_dir(path)
            .await
            .map_err(|e| ToolError::failed(format!("cannot list '{shown}': {e}")))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ToolError::failed(format!("cannot list '{shown}': {e}")))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();
        let total = entries.len();
        entries.truncate(MAX_LIST_ENTRIES);
        let mut payload = json!({ "path": shown, "entries": entries });
        if total > MAX_LIST_ENTRIES {
            payload["total"] = json!(total);
        }
        Ok(ToolSuccess::new(payload))
    }
}

impl Tool for FileTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "file",
            "Read, list, check, write, append to or delete a file inside the working \
             directory. Paths are relative; '..' is not allowed.",
            tool_parameters::<FileArgs>(),
        )
    }

    fn assess_risk(&self, args: &ToolArgs) -> Option<RiskVerdict> {
        let op = optional_str(args, "operation")?;
        file_op_is_read_only(op).then(|| RiskVerdict::low(format!("file {op} only reads")))
    }

    fn describe_action(&self, args: &ToolArgs) -> String {
        let mut text = format!(
            "File {}: {}",
            optional_str(args, "operation").unwrap_or("?"),
            optional_str(args, "path").unwrap_or("")
        );
        if let Some(content) = optional_str(args, "content") {
            text.push_str(&format!("\n  ({} bytes)\n", content.len()));
            text.push_str(&truncate_text(content.to_string(), 1000));
        }
        text
    }

    fn execute<'a>(&'a self, args: ToolArgs, _ctx: ToolContext<'a>) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: FileArgs = typed_args(args)?;
            let path = resolve_under(&self.root, &args.path)?;
            let shown = args.path.as_str();
            let io_err = |verb: &str, e: std::io::Error| {
                ToolError::failed(format!("cannot {verb} '{shown}': {e}"))
            };

            match args.operation {
                FileOperation::Read => {
                    let meta = fs::metadata(&path).await.map_err(|e| io_err("read", e))?;
                    if meta.is_dir() {
                        return Err(ToolError::failed(format!(
                            "'{shown}' is a directory, use operation 'list'"
                        )));
                    }
                    let content = fs::read_to_string(&path)
                        .await
                        .map_err(|e| io_err("read", e))?;
                    Ok(ToolSuccess::new(json!({
                        "path": shown,
                        "content": truncate_text(content, self.max_read_bytes),
                    })))
                }
                FileOperation::List => self.list(&path, shown).await,
                FileOperation::Exists => {
                    let exists = fs::try_exists(&path).await.unwrap_or(false);
                    Ok(ToolSuccess::new(json!({ "path": shown, "exists": exists })))
                }
                FileOperation::Write | FileOperation::Append => {
                    let content = args.content.unwrap_or_default();
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)
                            .await
                            .map_err(|e| io_err("create directory for", e))?;
                    }
                    let append = args.operation == FileOperation::Append;
                    let mut file = fs::OpenOptions::new()
                        .create(true)
                        .write(true)
                        .append(append)
                        .truncate(!append)
                        .open(&path)
                        .await
                        .map_err(|e| io_err("open", e))?;
                    file.write_all(content.as_bytes())
                        .await
                        .map_err(|e| io_err("write", e))?;
                    file.flush().await.map_err(|e| io_err("write", e))?;
                    Ok(ToolSuccess::new(json!({
                        "path": shown,
                        "bytes_written": content.len(),
                    })))
                }
                FileOperation::Delete => {
                    fs::remove_file(&path)
                        .await
                        .map_err(|e| io_err("delete", e))?;
                    Ok(ToolSuccess::new(json!({ "path": shown, "deleted": true })))
                }
            }
        })
    }
}

//! CLI settings and their mapping onto `steward-rs` types.
//!
//! [`CliConfig`] holds what the command line decides and converts it with
//! [`build_agent_config`](CliConfig::build_agent_config),
//! [`build_registry`](CliConfig::build_registry) and
//! [`build_skills`](CliConfig::build_skills).

use std::path::PathBuf;
use std::time::Duration;

use steward_rs::DEFAULT_MODEL;
use steward_rs::agent::AgentConfig;
use steward_rs::context::{DEFAULT_CONTEXT_WINDOW, InMemorySkills};
use steward_rs::exec::{CommandExecutor, CommandOptions};
use steward_rs::tools::{
    CommandSqlBackend, ExecuteSql, FileTool, HttpRequest, RenderChart, RenderTable, RunCommand,
    ToolRegistry,
};

/// Settings for one `steward` session.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Model identifier. Default: [`DEFAULT_MODEL`].
    pub model: String,
    /// Iteration cap per user turn. Default: `10`.
    pub max_iterations: u32,
    /// Context window in tokens.
    pub context_window: usize,
    /// Seconds of command silence before asking whether to keep waiting.
    pub idle_timeout_secs: u64,
    /// Working directory for commands and the file tool.
    pub workdir: PathBuf,
    /// Audit log of risk decisions. Relative paths resolve against `workdir`.
    pub audit_log: PathBuf,
    /// Session file. `None` keeps history in memory only.
    pub session: Option<PathBuf>,
    /// Database client command line; enables `execute_sql`.
    pub sql_command: Option<String>,
    /// Directory of `*.md` skills.
    pub skills_dir: Option<PathBuf>,
    /// Register the `http_request` tool.
    pub http: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_iterations: 10,
            context_window: DEFAULT_CONTEXT_WINDOW,
            idle_timeout_secs: 60,
            workdir: PathBuf::from("."),
            audit_log: PathBuf::from(".steward/audit.log"),
            session: None,
            sql_command: None,
            skills_dir: None,
            http: true,
        }
    }
}

impl CliConfig {
    pub fn command_options(&self) -> CommandOptions {
        CommandOptions::default()
            .with_idle_timeout(Duration::from_secs(self.idle_timeout_secs.max(1)))
            .with_workdir(&self.workdir)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        if self.audit_log.is_absolute() {
            self.audit_log.clone()
        } else {
            self.workdir.join(&self.audit_log)
        }
    }

    pub fn build_agent_config(&self) -> AgentConfig {
        AgentConfig::default()
            .with_model(self.model.clone())
            .with_max_iterations(self.max_iterations)
            .with_context_window(self.context_window)
            .with_command_options(self.command_options())
            .with_audit_log(self.audit_log_path())
    }

    /// Tools for this session. Fails only if the HTTP client cannot be built.
    pub fn build_registry(&self) -> Result<ToolRegistry, String> {
        let executor = CommandExecutor::new(self.command_options());
        let mut registry = ToolRegistry::new()
            .with(RunCommand::new(executor.clone()))
            .with(FileTool::new(&self.workdir))
            .with(RenderTable::new())
            .with(RenderChart::new());
        if let Some(command) = &self.sql_command {
            let backend = CommandSqlBackend::new(command.clone(), executor);
            registry.register(ExecuteSql::new(std::sync::Arc::new(backend)));
        }
        if self.http {
            registry.register(HttpRequest::new()?);
        }
        Ok(registry)
    }

    pub fn build_skills(&self) -> std::io::Result<InMemorySkills> {
        match &self.skills_dir {
            Some(dir) => InMemorySkills::from_dir(dir),
            None => Ok(InMemorySkills::new()),
        }
    }

    /// Environment facts appended to the system prompt.
    pub fn domain_context(&self) -> String {
        let mut lines = vec![format!("Working directory: {}", self.workdir.display())];
        match &self.sql_command {
            Some(command) => lines.push(format!(
                "A database is connected through `{command}`; use execute_sql for queries."
            )),
            None => lines.push("No database is connected; execute_sql is unavailable.".into()),
        }
        lines.join("\n")
    }
}

//! SQL execution through a pluggable [`SqlBackend`].
//!
//! The engine does not speak any database protocol itself.
//! [`CommandSqlBackend`] runs a configured client binary through the
//! [`CommandExecutor`], passing the statement in the `STEWARD_SQL`
//! environment variable and reading tab-separated rows back.

use crate::ToolDef;
use crate::exec::CommandExecutor;
use crate::safety::{RiskVerdict, sql_is_read_only};
use crate::tools::core::{
    Tool, ToolArgs, ToolContext, ToolError, ToolFuture, ToolSuccess, optional_str,
    tool_parameters, typed_args,
};
use crate::tools::render::format_table;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Environment variable carrying the statement to [`CommandSqlBackend`]'s client.
pub const SQL_ENV_VAR: &str = "STEWARD_SQL";

/// Rows returned to the model for exploratory queries.
pub const DEFAULT_MAX_MODEL_ROWS: usize = 200;

/// Result of one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlOutput {
    /// Column names; empty for statements that return no result set.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SqlOutput {
    pub fn is_tabular(&self) -> bool {
        !self.columns.is_empty()
    }
}

pub type SqlFuture<'a> = Pin<Box<dyn Future<Output = Result<SqlOutput, ToolError>> + Send + 'a>>;

/// A database the agent can query.
pub trait SqlBackend: Send + Sync {
    fn execute<'a>(&'a self, sql: &'a str, ctx: ToolContext<'a>) -> SqlFuture<'a>;
}

// ── CommandSqlBackend ──────────────────────────────────────────────

/// Runs a client command line such as
/// `mysql -B -e "$STEWARD_SQL" shop` or
/// `psql -A -F "$(printf '\t')" -P footer=off -c "$STEWARD_SQL" shop`.
///
/// The first output line is the header, each following line a row, with
/// tab-separated fields. A non-zero exit is a failure carrying the client's
/// error text.
pub struct CommandSqlBackend {
    command: String,
    executor: CommandExecutor,
}

impl CommandSqlBackend {
    pub fn new(command: impl Into<String>, executor: CommandExecutor) -> Self {
        Self {
            command: command.into(),
            executor,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl SqlBackend for CommandSqlBackend {
    fn execute<'a>(&'a self, sql: &'a str, ctx: ToolContext<'a>) -> SqlFuture<'a> {
        Box::pin(async move {
            let executor =
                CommandExecutor::new(self.executor.options().clone().with_env(SQL_ENV_VAR, sql));
            let result = executor
                .run(&self.command, ctx.ui, None, ctx.cancel)
                .await?;
            if !result.success() {
                let detail = if result.truncated_stderr.trim().is_empty() {
                    result.truncated_stdout
                } else {
                    result.truncated_stderr
                };
                return Err(ToolError::failed(detail.trim().to_string()));
            }
            Ok(parse_tsv(&result.stdout))
        })
    }
}

/// Parse header-plus-rows tab-separated text.
pub fn parse_tsv(text: &str) -> SqlOutput {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return SqlOutput::default();
    };
    let columns: Vec<String> = header.split('\t').map(str::to_string).collect();
    let rows = lines
        .map(|l| l.split('\t').map(str::to_string).collect())
        .collect();
    SqlOutput { columns, rows }
}

// ── ExecuteSql ─────────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
pub struct ExecuteSqlArgs {
    /// The SQL to run. Multiple statements may be separated by ';'.
    pub sql: String,
}

/// Runs SQL against the configured backend.
///
/// Tabular results are shown to the user as a table unless the call is
/// marked `task_type: "exploratory"`, in which case rows go back to the
/// model.
pub struct ExecuteSql {
    backend: Arc<dyn SqlBackend>,
    max_model_rows: usize,
}

impl ExecuteSql {
    pub fn new(backend: Arc<dyn SqlBackend>) -> Self {
        Self {
            backend,
            max_model_rows: DEFAULT_MAX_MODEL_ROWS,
        }
    }

    pub fn max_model_rows(mut self, max: usize) -> Self {
        self.max_model_rows = max;
        self
    }
}

impl Tool for ExecuteSql {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "execute_sql",
            "Run SQL against the connected database. Query results are displayed to the \
             user as a table. Set task_type='exploratory' to receive the rows yourself \
             instead (for example to inspect a schema before answering).",
            tool_parameters::<ExecuteSqlArgs>(),
        )
    }

    fn assess_risk(&self, args: &ToolArgs) -> Option<RiskVerdict> {
        let sql = optional_str(args, "sql")?;
        sql_is_read_only(sql).then(|| RiskVerdict::low("read-only SQL"))
    }

    fn describe_action(&self, args: &ToolArgs) -> String {
        format!(
            "Execute SQL:\n  {}",
            optional_str(args, "sql").unwrap_or("").trim()
        )
    }

    fn execute<'a>(&'a self, args: ToolArgs, ctx: ToolContext<'a>) -> ToolFuture<'a> {
        Box::pin(async move {
            let exploratory = optional_str(&args, "task_type") == Some("exploratory");
            let ExecuteSqlArgs { sql } = typed_args(args)?;
            let output = self.backend.execute(&sql, ctx).await?;
            debug!(
                "[sql] {} column(s), {} row(s)",
                output.columns.len(),
                output.rows.len()
            );

            if !output.is_tabular() {
                return Ok(ToolSuccess::new(json!({ "message": "Statement executed." })));
            }
            if exploratory {
                let shown = output.rows.len().min(self.max_model_rows);
                let mut payload = json!({
                    "columns": output.columns,
                    "rows": output.rows.get(..shown).unwrap_or_default(),
                    "row_count": output.rows.len(),
                });
                if shown < output.rows.len() {
                    payload["truncated"] = json!(true);
                }
                return Ok(ToolSuccess::new(payload));
            }
            let table = format_table(&output.columns, &output.rows);
            Ok(ToolSuccess::with_artifact(
                json!({ "columns": output.columns, "row_count": output.rows.len() }),
                table,
            ))
        })
    }
}

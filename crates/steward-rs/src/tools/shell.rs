//! `run_command`: shell commands through the [`CommandExecutor`].

use crate::ToolDef;
use crate::exec::CommandExecutor;
use crate::safety::{RiskVerdict, shell_is_read_only};
use crate::tools::core::{
    DEFAULT_MAX_RESULT_BYTES, Tool, ToolArgs, ToolContext, ToolError, ToolFuture, ToolSuccess,
    optional_str, tool_parameters, truncate_text, typed_args,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

/// How command output reaches the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Stream lines live; the model gets the tail.
    #[default]
    Streaming,
    /// No live output; the model gets everything (capped).
    Full,
}

#[derive(Deserialize, JsonSchema)]
pub struct RunCommandArgs {
    /// Shell command line, e.g. 'ls -la data/' or 'wc -l *.csv'.
    pub command: String,
    /// 'streaming' (default) shows output live, 'full' returns all output to you.
    #[serde(default)]
    pub output_mode: OutputMode,
}

/// Runs a shell command.
#[derive(Debug, Clone)]
pub struct RunCommand {
    executor: CommandExecutor,
    max_result_bytes: usize,
}

impl RunCommand {
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            executor,
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }

    pub fn max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }
}

impl Tool for RunCommand {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "run_command",
            "Run a shell command (via sh -c) in the working directory. Destructive and \
             interactive programs (rm, sudo, kill, vim, ssh, ...) are refused.",
            tool_parameters::<RunCommandArgs>(),
        )
    }

    fn assess_risk(&self, args: &ToolArgs) -> Option<RiskVerdict> {
        let command = optional_str(args, "command")?;
        shell_is_read_only(command).then(|| RiskVerdict::low("read-only command"))
    }

    fn describe_action(&self, args: &ToolArgs) -> String {
        format!(
            "Run command:\n  $ {}",
            optional_str(args, "command").unwrap_or("")
        )
    }

    fn execute<'a>(&'a self, args: ToolArgs, ctx: ToolContext<'a>) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: RunCommandArgs = typed_args(args)?;
            let sink = match args.output_mode {
                OutputMode::Streaming => ctx.ui.line_sink(),
                OutputMode::Full => None,
            };
            let result = self
                .executor
                .run(&args.command, ctx.ui, sink, ctx.cancel)
                .await?;

            if !result.success() {
                let detail = if result.truncated_stderr.trim().is_empty() {
                    &result.truncated_stdout
                } else {
                    &result.truncated_stderr
                };
                return Err(ToolError::failed(format!(
                    "command exited with code {}: {}",
                    result.exit_code,
                    detail.trim()
                )));
            }

            let (stdout, stderr) = match args.output_mode {
                OutputMode::Streaming => (result.truncated_stdout, result.truncated_stderr),
                OutputMode::Full => (
                    truncate_text(result.stdout, self.max_result_bytes),
                    truncate_text(result.stderr, self.max_result_bytes),
                ),
            };
            let mut payload = json!({ "exit_code": result.exit_code, "stdout": stdout });
            if !stderr.is_empty() {
                payload["stderr"] = json!(stderr);
            }
            Ok(ToolSuccess::new(payload))
        })
    }
}

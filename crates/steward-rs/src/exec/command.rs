//! Subprocess execution with streamed output and an idle timeout.
//!
//! [`CommandExecutor::run`] refuses dangerous and interactive programs
//! before anything is spawned, then runs the command under `sh -c`. Two
//! reader tasks drain stdout and stderr line by line, forward each line to
//! an optional [`LineSink`], and ping a bounded activity channel. A single
//! `select!` loop watches that channel, the idle deadline, process exit and
//! the cancellation token, and is the only place that ends the run.
//!
//! The idle timeout measures silence, not total runtime: every line from
//! either stream pushes the deadline back. When the deadline passes the
//! user is asked once whether to keep waiting.

use super::output::OutputBuffer;
use super::shellwords::{
    Segment, parse_env_assignment, program_basename, segments, split_leading_env,
};
use crate::ui::{Confirm, LineSink};
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default silence window before the user is asked whether to keep waiting.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-stream output cap (10 MB). Older lines are dropped past this.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Lines kept in the truncated variant when the command succeeds.
pub const SUCCESS_TAIL_LINES: usize = 20;

/// Lines kept in the truncated variant when the command fails.
pub const FAILURE_TAIL_LINES: usize = 100;

const ACTIVITY_CHANNEL_CAPACITY: usize = 64;

/// How long to keep reading output after the shell has exited.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Programs that are never run.
pub const BLOCKED_COMMANDS: &[&str] = &[
    "rm", "sudo", "dd", "mkfs", "fdisk", "shutdown", "reboot", "halt", "poweroff", "init",
    "killall", "kill",
];

/// Programs that need a terminal the agent cannot provide.
pub const INTERACTIVE_COMMANDS: &[&str] = &[
    "ssh", "passwd", "vi", "vim", "nvim", "nano", "emacs", "less", "more", "top", "htop", "man",
    "su", "ftp", "telnet", "screen", "tmux",
];

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Outcome of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// Last [`SUCCESS_TAIL_LINES`] or [`FAILURE_TAIL_LINES`] lines of stdout.
    pub truncated_stdout: String,
    pub truncated_stderr: String,
    /// Exit code, or -1 when the process was terminated by a signal.
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty command")]
    EmptyCommand,
    #[error("command '{0}' is blocked for safety")]
    Blocked(String),
    #[error("command '{0}' is interactive and cannot run without a terminal")]
    Interactive(String),
    #[error("failed to start command: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("command produced no output for {}s and was stopped", .0.as_secs())]
    IdleTimeout(Duration),
    #[error("command cancelled")]
    Cancelled,
    #[error("failed waiting for command: {0}")]
    Io(#[source] std::io::Error),
}

/// Executor settings.
#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub idle_timeout: Duration,
    pub max_output_bytes: usize,
    pub success_tail_lines: usize,
    pub failure_tail_lines: usize,
    /// Working directory for spawned commands. `None` inherits ours.
    pub workdir: Option<PathBuf>,
    /// Extra variables set on every command, below any leading `KEY=value`.
    pub extra_env: Vec<(String, String)>,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            success_tail_lines: SUCCESS_TAIL_LINES,
            failure_tail_lines: FAILURE_TAIL_LINES,
            workdir: None,
            extra_env: Vec::new(),
        }
    }
}

impl CommandOptions {
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.push((key.into(), value.into()));
        self
    }
}

/// Programs that run their arguments as another command.
const WRAPPER_COMMANDS: &[&str] = &[
    "env", "nohup", "exec", "command", "builtin", "nice", "time", "timeout", "stdbuf", "xargs",
];

/// Shells whose `-c` argument is itself a command line.
const SHELLS: &[&str] = &["sh", "bash", "dash", "zsh", "ksh"];

/// Reject a command line before anything is spawned.
///
/// Every simple command of a compound line is checked, including those in
/// subshells, groups and command substitutions, after leading `KEY=value`
/// assignments, directory prefixes and wrappers such as `nohup` are
/// stripped. Scripts passed to `sh -c` or `eval` are checked the same way.
/// A `sudo` word anywhere in the line is rejected as well.
pub fn check_command(command: &str) -> Result<(), ExecError> {
    let segs = segments(command);
    if segs.iter().all(|s| s.words.is_empty()) {
        return Err(ExecError::EmptyCommand);
    }
    segs.iter().try_for_each(check_segment)
}

fn check_segment(seg: &Segment) -> Result<(), ExecError> {
    if seg.words.iter().any(|w| program_basename(w) == "sudo") {
        return Err(ExecError::Blocked("sudo".into()));
    }
    let words = strip_wrappers(&seg.words);
    let Some(program) = words.first().map(|w| program_basename(w)) else {
        return Ok(());
    };
    if BLOCKED_COMMANDS.contains(&program) {
        return Err(ExecError::Blocked(program.to_string()));
    }
    if INTERACTIVE_COMMANDS.contains(&program) {
        return Err(ExecError::Interactive(program.to_string()));
    }
    match inline_script(program, words.get(1..).unwrap_or_default()) {
        Some(script) => match check_command(&script) {
            Err(ExecError::EmptyCommand) => Ok(()),
            other => other,
        },
        None => Ok(()),
    }
}

/// Skip wrapper programs with their options, assignments and numeric
/// arguments (`nice -n 5`, `timeout 10s`) to reach the program they run.
fn strip_wrappers(words: &[String]) -> &[String] {
    let mut rest = words;
    while let Some(first) = rest.first()
        && WRAPPER_COMMANDS.contains(&program_basename(first))
    {
        rest = rest.get(1..).unwrap_or_default();
        while let Some(word) = rest.first()
            && (word.starts_with('-')
                || word.starts_with(|c: char| c.is_ascii_digit())
                || parse_env_assignment(word).is_some())
        {
            rest = rest.get(1..).unwrap_or_default();
        }
    }
    rest
}

/// The command line a shell or `eval` would run from `args`.
fn inline_script(program: &str, args: &[String]) -> Option<String> {
    if program == "eval" {
        return Some(args.join(" "));
    }
    if !SHELLS.contains(&program) {
        return None;
    }
    let flag = args
        .iter()
        .position(|a| a.starts_with('-') && !a.starts_with("--") && a.contains('c'))?;
    args.get(flag + 1).cloned()
}

/// Runs shell commands with streamed output and idle-timeout supervision.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    options: CommandOptions,
}

impl CommandExecutor {
    pub fn new(options: CommandOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CommandOptions {
        &self.options
    }

    /// Run `command` to completion.
    ///
    /// `confirm` is asked whether to keep waiting each time the idle window
    /// elapses. Cancelling `cancel` kills the process and yields
    /// [`ExecError::Cancelled`]; so does cancellation while the idle prompt
    /// is open.
    pub async fn run(
        &self,
        command: &str,
        confirm: &dyn Confirm,
        sink: Option<LineSink>,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, ExecError> {
        check_command(command)?;
        let (env, script) = split_leading_env(command);
        if script.is_empty() {
            return Err(ExecError::EmptyCommand);
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .envs(self.options.extra_env.iter().cloned())
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.options.workdir {
            cmd.current_dir(dir);
        }

        let start = std::time::Instant::now();
        let mut child = cmd.spawn().map_err(ExecError::Spawn)?;
        info!("[exec] started pid={:?}: {command}", child.id());

        let (activity_tx, mut activity_rx) = mpsc::channel::<()>(ACTIVITY_CHANNEL_CAPACITY);
        let max = self.options.max_output_bytes;
        let stdout = Arc::new(Mutex::new(OutputBuffer::new(max)));
        let stderr = Arc::new(Mutex::new(OutputBuffer::new(max)));
        let mut readers = [
            child.stdout.take().map(|out| {
                spawn_reader(out, Stream::Stdout, stdout.clone(), sink.clone(), activity_tx.clone())
            }),
            child.stderr.take().map(|err| {
                spawn_reader(err, Stream::Stderr, stderr.clone(), sink, activity_tx.clone())
            }),
        ];
        drop(activity_tx);

        let idle = self.options.idle_timeout;
        let mut deadline = Instant::now() + idle;
        let status = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    terminate(&mut child, &readers).await;
                    info!("[exec] cancelled after {:.1}s", start.elapsed().as_secs_f64());
                    return Err(ExecError::Cancelled);
                }
                status = child.wait() => break status.map_err(ExecError::Io)?,
                Some(()) = activity_rx.recv() => {
                    deadline = Instant::now() + idle;
                }
                () = tokio::time::sleep_until(deadline) => {
                    debug!("[exec] idle for {}s, asking whether to continue", idle.as_secs());
                    let prompt = format!(
                        "Command has produced no output for {}s. Keep waiting?",
                        idle.as_secs()
                    );
                    let keep_waiting = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        answer = confirm.confirm(&prompt) => Some(answer),
                    };
                    match keep_waiting {
                        None => {
                            terminate(&mut child, &readers).await;
                            return Err(ExecError::Cancelled);
                        }
                        Some(false) => {
                            terminate(&mut child, &readers).await;
                            warn!("[exec] stopped after {idle:?} of silence");
                            return Err(ExecError::IdleTimeout(idle));
                        }
                        Some(true) => deadline = Instant::now() + idle,
                    }
                }
            }
        };

        // A background job can inherit the pipes and keep them open after
        // the shell exits, so draining is bounded and still cancellable.
        let drained = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            () = join_readers(&mut readers) => Some(true),
            () = tokio::time::sleep(READER_DRAIN_TIMEOUT) => Some(false),
        };
        match drained {
            None => {
                abort_readers(&readers);
                info!("[exec] cancelled while draining output");
                return Err(ExecError::Cancelled);
            }
            Some(false) => {
                abort_readers(&readers);
                debug!("[exec] output still open after exit, stopped reading");
            }
            Some(true) => {}
        }

        let stdout = take_buffer(&stdout, max);
        let stderr = take_buffer(&stderr, max);
        let exit_code = status.code().unwrap_or(-1);
        debug!(
            "[exec] exit={exit_code} in {:.1}s ({} stdout lines, {} stderr lines)",
            start.elapsed().as_secs_f64(),
            stdout.line_count(),
            stderr.line_count(),
        );

        let tail = if exit_code == 0 {
            self.options.success_tail_lines
        } else {
            self.options.failure_tail_lines
        };
        Ok(CommandResult {
            stdout: stdout.full(),
            stderr: stderr.full(),
            truncated_stdout: stdout.tail(tail),
            truncated_stderr: stderr.tail(tail),
            exit_code,
        })
    }
}

type Readers = [Option<JoinHandle<()>>; 2];

fn spawn_reader<R>(
    reader: R,
    stream: Stream,
    buffer: Arc<Mutex<OutputBuffer>>,
    sink: Option<LineSink>,
    activity: mpsc::Sender<()>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&raw);
                    let line = text.trim_end_matches(['\n', '\r']);
                    if let Some(ref sink) = sink {
                        sink(stream, line);
                    }
                    lock(&buffer).push(line.to_string());
                    // A full channel already means "active"; dropping the ping is fine.
                    let _ = activity.try_send(());
                }
                Err(e) => {
                    debug!("[exec] {stream:?} read error: {e}");
                    break;
                }
            }
        }
    })
}

fn lock(buffer: &Mutex<OutputBuffer>) -> MutexGuard<'_, OutputBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take_buffer(buffer: &Mutex<OutputBuffer>, max: usize) -> OutputBuffer {
    std::mem::replace(&mut *lock(buffer), OutputBuffer::new(max))
}

async fn join_readers(readers: &mut Readers) {
    for reader in readers.iter_mut().flatten() {
        let _ = reader.await;
    }
}

fn abort_readers(readers: &Readers) {
    for reader in readers.iter().flatten() {
        reader.abort();
    }
}

async fn terminate(child: &mut Child, readers: &Readers) {
    if let Err(e) = child.start_kill() {
        debug!("[exec] kill failed (process may have exited): {e}");
    }
    let _ = child.wait().await;
    abort_readers(readers);
}

use super::{Confirm, ConfirmFuture, LineSink, LoadingGuard, Ui, is_affirmative};
use crate::exec::command::Stream;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Line-oriented terminal UI: prompts on stderr, answers from stdin,
/// artifacts on stdout.
///
/// Confirmation answers and REPL input come from the same line queue
/// ([`read_line`](ConsoleUi::read_line)), so a prompt abandoned on Ctrl-C
/// never eats the next line the user types.
#[derive(Debug, Clone, Default)]
pub struct ConsoleUi {
    /// Echo streamed command output as it arrives.
    pub stream_output: bool,
    input: Arc<LineInput>,
}

impl ConsoleUi {
    pub fn new() -> Self {
        Self {
            stream_output: true,
            input: Arc::default(),
        }
    }

    /// Read answers and requests from `reader` instead of stdin.
    pub fn with_input(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            stream_output: true,
            input: Arc::new(LineInput::from_reader(reader)),
        }
    }

    /// Next line of user input, or `None` at end of input.
    ///
    /// Cancel-safe: dropping the future before it resolves loses no line.
    pub async fn read_line(&self) -> Option<String> {
        self.input.next_line().await
    }
}

impl Confirm for ConsoleUi {
    fn confirm<'a>(&'a self, prompt: &'a str) -> ConfirmFuture<'a> {
        Box::pin(async move {
            eprint!("{prompt} [y/N] ");
            let _ = std::io::stderr().flush();
            self.read_line()
                .await
                .is_some_and(|line| is_affirmative(&line))
        })
    }
}

impl Ui for ConsoleUi {
    fn show_loading(&self, label: &str) -> LoadingGuard {
        eprint!("{label}...");
        let _ = std::io::stderr().flush();
        LoadingGuard::new(|| {
            eprint!("\r\x1b[K");
            let _ = std::io::stderr().flush();
        })
    }

    fn line_sink(&self) -> Option<LineSink> {
        if !self.stream_output {
            return None;
        }
        Some(Arc::new(|stream, line| match stream {
            Stream::Stdout => eprintln!("  │ {line}"),
            Stream::Stderr => eprintln!("  ! {line}"),
        }))
    }

    fn display(&self, artifact: &str) {
        println!("{artifact}");
    }

    fn show_action(&self, description: &str) {
        eprintln!("\n{description}");
    }

    fn show_failure(&self, tool: &str, message: &str, elapsed: Option<Duration>) {
        match elapsed {
            Some(d) => eprintln!("✗ {tool}: {message} ({:.1}s)", d.as_secs_f64()),
            None => eprintln!("✗ {tool}: {message}"),
        }
    }
}

// ── Input queue ───────────────────────────────────────────────────

type Source = Box<dyn BufRead + Send>;

/// Lines pumped from a blocking reader on a dedicated thread, started on
/// first use. `source` is `None` for stdin.
#[derive(Default)]
struct LineInput {
    source: std::sync::Mutex<Option<Source>>,
    lines: tokio::sync::Mutex<Option<mpsc::Receiver<String>>>,
}

impl LineInput {
    fn from_reader(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            source: std::sync::Mutex::new(Some(Box::new(reader))),
            lines: tokio::sync::Mutex::default(),
        }
    }

    async fn next_line(&self) -> Option<String> {
        let mut lines = self.lines.lock().await;
        if lines.is_none() {
            let source = self.source.lock().ok().and_then(|mut s| s.take());
            *lines = Some(spawn_pump(source));
        }
        lines.as_mut()?.recv().await
    }
}

impl std::fmt::Debug for LineInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineInput").finish_non_exhaustive()
    }
}

fn spawn_pump(source: Option<Source>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    let spawned = std::thread::Builder::new()
        .name("steward-input".into())
        .spawn(move || match source {
            Some(reader) => pump(reader, &tx),
            None => pump(std::io::stdin().lock(), &tx),
        });
    if let Err(e) = spawned {
        warn!("Failed to start input reader: {e}");
    }
    rx
}

fn pump(reader: impl BufRead, tx: &mpsc::Sender<String>) {
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if tx.blocking_send(line).is_err() {
            break;
        }
    }
}

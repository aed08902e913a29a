//! User-facing interaction ports.
//!
//! The orchestration engine never talks to a terminal directly. Everything
//! the user sees or answers goes through the [`Ui`] trait: confirmation
//! prompts, a loading indicator while the model thinks, live command output,
//! and final artifacts such as tables and charts. [`ConsoleUi`] is the plain
//! stdin/stderr implementation used by the CLI.

mod console;

pub use console::ConsoleUi;

use crate::exec::command::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Boxed future returned by [`Confirm::confirm`].
pub type ConfirmFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Shared callback that receives each line of streamed command output.
pub type LineSink = Arc<dyn Fn(Stream, &str) + Send + Sync>;

/// A yes/no question put to the user.
///
/// Implementations resolve to `true` only on an explicit yes. Callers that
/// also watch a cancellation token treat cancellation as `false`.
pub trait Confirm: Send + Sync {
    fn confirm<'a>(&'a self, prompt: &'a str) -> ConfirmFuture<'a>;
}

/// Everything the agent needs from a user interface.
pub trait Ui: Confirm {
    /// Show a loading indicator until the returned guard is stopped or dropped.
    fn show_loading(&self, label: &str) -> LoadingGuard;

    /// Sink for live command output, or `None` to suppress streaming.
    fn line_sink(&self) -> Option<LineSink> {
        None
    }

    /// Render a final artifact (a table or chart) for the user.
    fn display(&self, artifact: &str);

    /// Describe an action in full before asking for confirmation.
    fn show_action(&self, description: &str);

    /// Report a failed tool call in one short line.
    fn show_failure(&self, tool: &str, message: &str, elapsed: Option<Duration>);
}

/// Stops a loading indicator when [`stop`](LoadingGuard::stop)ped or dropped.
pub struct LoadingGuard {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl LoadingGuard {
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// A guard with nothing to stop.
    pub fn noop() -> Self {
        Self { stop: None }
    }

    pub fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl std::fmt::Debug for LoadingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingGuard")
            .field("active", &self.stop.is_some())
            .finish()
    }
}

/// Parse a free-text answer to a yes/no prompt.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn loading_guard_stops_once_on_drop() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        {
            let _guard = LoadingGuard::new(move || flag.store(true, Ordering::SeqCst));
        }
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn explicit_stop_runs_callback() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        LoadingGuard::new(move || flag.store(true, Ordering::SeqCst)).stop();
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn affirmative_answers() {
        assert!(is_affirmative("y"));
        assert!(is_affirmative(" YES \n"));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("no"));
        assert!(!is_affirmative("yep"));
    }
}

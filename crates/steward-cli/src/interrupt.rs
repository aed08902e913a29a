//! Session-wide Ctrl-C routing.
//!
//! One signal listener lives for the whole session. While a request is
//! running, Ctrl-C cancels that request's token; while the prompt is idle,
//! it ends the session.

use std::sync::{Arc, Mutex, PoisonError};

use steward_rs::prelude::CancellationToken;

/// What a Ctrl-C press should do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// A request was running and has been cancelled.
    CancelledTurn,
    /// Nothing was running; the session should end.
    Quit,
}

/// Tracks the cancellation token of the request in flight, if any.
#[derive(Debug, Clone, Default)]
pub struct Interrupts {
    current: Arc<Mutex<Option<CancellationToken>>>,
    quit: CancellationToken,
}

impl Interrupts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token for the request about to run.
    pub fn begin_turn(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.slot() = Some(token.clone());
        token
    }

    /// The request finished; later presses go back to ending the session.
    pub fn end_turn(&self) {
        self.slot().take();
    }

    /// Handle one Ctrl-C press.
    pub fn interrupt(&self) -> InterruptAction {
        match self.slot().take() {
            Some(token) => {
                token.cancel();
                InterruptAction::CancelledTurn
            }
            None => {
                self.quit.cancel();
                InterruptAction::Quit
            }
        }
    }

    /// Cancelled once Ctrl-C arrives with no request running.
    pub fn quit_token(&self) -> CancellationToken {
        self.quit.clone()
    }

    /// Spawn the listener. It runs until the session ends.
    pub fn listen(&self) -> tokio::task::JoinHandle<()> {
        let interrupts = self.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                match interrupts.interrupt() {
                    InterruptAction::CancelledTurn => eprintln!("\nCancelling..."),
                    InterruptAction::Quit => {
                        eprintln!();
                        break;
                    }
                }
            }
        })
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_cancels_running_turn_and_keeps_session() {
        let interrupts = Interrupts::new();
        let turn = interrupts.begin_turn();

        assert_eq!(interrupts.interrupt(), InterruptAction::CancelledTurn);
        assert!(turn.is_cancelled());
        assert!(!interrupts.quit_token().is_cancelled());
    }

    #[test]
    fn interrupt_while_idle_quits() {
        let interrupts = Interrupts::new();
        let turn = interrupts.begin_turn();
        interrupts.end_turn();

        assert_eq!(interrupts.interrupt(), InterruptAction::Quit);
        assert!(!turn.is_cancelled());
        assert!(interrupts.quit_token().is_cancelled());
    }

    #[test]
    fn second_press_after_cancel_quits() {
        let interrupts = Interrupts::new();
        let _turn = interrupts.begin_turn();

        assert_eq!(interrupts.interrupt(), InterruptAction::CancelledTurn);
        assert_eq!(interrupts.interrupt(), InterruptAction::Quit);
    }

    #[test]
    fn each_turn_gets_a_fresh_token() {
        let interrupts = Interrupts::new();
        let first = interrupts.begin_turn();
        interrupts.interrupt();
        interrupts.end_turn();

        let second = interrupts.begin_turn();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }
}

//! Agent runtime: the [`Orchestrator`] loop and its supporting modules.
//!
//! - [`orchestrator`]: the bounded conversation loop. Start here.
//! - [`config`]: [`AgentConfig`] for model, iteration cap, context window,
//!   compression, retries and command execution.
//! - [`execution`]: one model request, and one tool call through risk,
//!   confirmation and dispatch.
//! - [`events`]: [`EventHandler`] and [`AgentEvent`] for observing the loop.
//! - [`guard`]: the check for completion claims no tool backed up.
//! - [`session`]: [`SessionStore`] and the JSON [`FileSessionStore`].

pub mod config;
pub mod error;
pub mod events;
mod execution;
pub mod guard;
pub mod orchestrator;
pub mod session;

pub use config::AgentConfig;
pub use error::AgentError;
pub use events::{
    AgentEvent, CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
};
pub use guard::claims_unverified_completion;
pub use orchestrator::{Orchestrator, TurnInput, TurnOutcome};
pub use session::{FileSessionStore, LegacyEntry, PriorHistory, SessionError, SessionStore};

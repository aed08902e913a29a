//! Model-call layer: the [`ModelClient`] seam and retry with backoff.
//!
//! - [`ModelClient`] is what the orchestrator and the summarizer talk to.
//!   [`OpenRouterClient`] implements it over HTTP; tests script it.
//! - [`retry`] classifies failed calls by HTTP status and retries the
//!   transient ones with a capped, cancellable backoff.

pub mod retry;

pub use retry::{CallError, FailureKind, RetryConfig, classify, retry_call};

use crate::{ChatCompletion, ChatRequest, OpenRouterClient};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`ModelClient::chat`].
pub type ChatFuture<'a> = Pin<Box<dyn Future<Output = Result<ChatCompletion, String>> + Send + 'a>>;

/// Anything that can answer a chat completion request.
///
/// Errors are plain strings in the `OpenRouter API HTTP <status>: ...` /
/// `request failed: ...` shape so [`retry`] can classify them.
pub trait ModelClient: Send + Sync {
    fn chat<'a>(&'a self, request: &'a ChatRequest) -> ChatFuture<'a>;
}

impl ModelClient for OpenRouterClient {
    fn chat<'a>(&'a self, request: &'a ChatRequest) -> ChatFuture<'a> {
        Box::pin(OpenRouterClient::chat(self, request))
    }
}

//! Cancellable retry for model calls.
//!
//! Client errors arrive as strings (`OpenRouter API HTTP <status>: ...` or
//! `request failed: ...`). [`classify`] reads the status code out of them:
//! rate limits, request timeouts and server errors are retried, other
//! statuses are not. Transport failures without a status are retried.
//! Anything unrecognised is treated as permanent so a malformed request is
//! never replayed.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How many times to retry and how long to back off between attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt. 0 disables retrying.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles on each retry after that.
    pub base_delay: Duration,
    /// Upper bound for a single backoff.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (0-based).
    ///
    /// The doubled delay is capped at `max_delay`, then spread over its upper
    /// half by a fixed per-retry factor so concurrent sessions drift apart.
    pub fn backoff(&self, retry: u32) -> Duration {
        let doubled = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);
        doubled.mul_f64(0.5 + 0.5 * spread(retry))
    }
}

/// Deterministic value in `[0, 1)` for a retry number.
fn spread(retry: u32) -> f64 {
    let mixed = retry.wrapping_add(1).wrapping_mul(0x9E37_79B9) >> 22;
    f64::from(mixed) / 1024.0
}

// ── Classification ────────────────────────────────────────────────

/// Whether a failed call is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

const TRANSPORT_PHRASES: &[&str] = &[
    "request failed:",
    "failed to read response",
    "connection reset",
    "connection refused",
    "connection closed",
    "timed out",
    "broken pipe",
];

pub fn classify(error: &str) -> FailureKind {
    if let Some(status) = http_status(error) {
        return match status {
            408 | 425 | 429 => FailureKind::Transient,
            501 | 505 => FailureKind::Permanent,
            500..=599 => FailureKind::Transient,
            _ => FailureKind::Permanent,
        };
    }
    let lower = error.to_lowercase();
    if TRANSPORT_PHRASES.iter().any(|p| lower.contains(p)) {
        FailureKind::Transient
    } else {
        FailureKind::Permanent
    }
}

/// Status code following `HTTP ` in a client error, if any.
fn http_status(error: &str) -> Option<u16> {
    let (_, rest) = error.split_once("HTTP ")?;
    let digits = rest.get(..3)?;
    if digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

// ── Retry loop ────────────────────────────────────────────────────

/// Why [`retry_call`] gave up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError {
    /// Error of the last attempt made.
    #[error("{0}")]
    Failed(String),
    #[error("cancelled")]
    Cancelled,
}

/// Run `call`, repeating it after a backoff while it fails transiently and
/// retries remain.
///
/// Cancellation is checked before each attempt and wins over both an
/// in-flight attempt and a backoff sleep; the pending future is dropped.
pub async fn retry_call<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut retry = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        let error = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            result = call() => match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            },
        };
        if retry >= config.max_retries || classify(&error) == FailureKind::Permanent {
            return Err(CallError::Failed(error));
        }

        let delay = config.backoff(retry);
        retry += 1;
        warn!(
            retry,
            max_retries = config.max_retries,
            "Model call failed: {error}. Retrying in {delay:?}"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

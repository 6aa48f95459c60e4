//! Retry policy shared by model calls, repository reads and action execution.
//!
//! Exponential backoff with a cap; a server-provided retry-after hint can
//! only lengthen the wait, never shorten it.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, ProviderError, RepoError};

/// Errors that know whether a retry can help.
pub trait Retryable {
    fn is_transient(&self) -> bool;

    /// Server-suggested wait, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for ProviderError {
    fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => {
                matches!(status_code, 408 | 429 | 529) || (500..600).contains(status_code)
            }
            Self::AuthenticationFailed(_) | Self::ModelNotFound(_) | Self::NotConfigured(_) => {
                false
            }
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}

impl Retryable for RepoError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Timeout(_) | Self::Network(_)
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}

impl Retryable for Error {
    fn is_transient(&self) -> bool {
        match self {
            Self::ModelCall(e) => e.is_transient(),
            Self::ActionTransient { .. } => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ModelCall(e) => e.retry_after(),
            Self::ActionTransient {
                retry_after_secs, ..
            } => retry_after_secs.map(Duration::from_secs),
            _ => None,
        }
    }
}

/// Why a cancellable retry loop gave up.
#[derive(Debug, Clone)]
pub enum RetryError<E> {
    /// The token fired before an attempt started or during a backoff.
    Cancelled,
    /// The last attempt's error.
    Failed(E),
}

impl<E> RetryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::Failed(err) => err.fmt(f),
        }
    }
}

impl<E: Into<Error>> From<RetryError<E>> for Error {
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::Cancelled => Error::Cancelled,
            RetryError::Failed(err) => err.into(),
        }
    }
}

/// Sleep for `delay` unless `cancel` fires first. Returns `false` when cancelled.
pub async fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Max attempts plus an exponential backoff function.
///
/// `max_attempts` counts the first try: 3 means one call and two retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based: the wait after the first failure is `backoff_for(1)`).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay before the next attempt after `attempt` attempts failed with `err`,
    /// or `None` when the error is permanent or attempts are exhausted.
    pub fn next_delay<E: Retryable>(&self, attempt: u32, err: &E) -> Option<Duration> {
        if !err.is_transient() || attempt >= self.max_attempts {
            return None;
        }
        let backoff = self.backoff_for(attempt);
        Some(err.retry_after().map_or(backoff, |hint| hint.max(backoff)))
    }

    /// Run `op` until it succeeds, fails permanently, attempts run out, or
    /// `cancel` fires.
    ///
    /// An attempt already running completes; no further attempt starts and
    /// a pending backoff is cut short.
    pub async fn retry_until_cancelled<T, E, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                debug!(operation = label, attempt, "Cancelled before attempt");
                return Err(RetryError::Cancelled);
            }
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => match self.next_delay(attempt, &err) {
                    Some(_) if cancel.is_cancelled() => return Err(RetryError::Cancelled),
                    Some(delay) => {
                        warn!(
                            operation = label,
                            attempt,
                            max_attempts = self.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Transient failure, retrying"
                        );
                        if !sleep_unless_cancelled(delay, cancel).await {
                            debug!(operation = label, attempt, "Cancelled during backoff");
                            return Err(RetryError::Cancelled);
                        }
                    }
                    None => return Err(RetryError::Failed(err)),
                },
            }
        }
    }
}

//! Rate-limited provider: bounds concurrency and per-call latency.
//!
//! Wraps any provider with a [`RateLimiter`] shared across concurrent runs
//! and a per-request timeout. A timed-out call surfaces as
//! [`ProviderError::Timeout`], which the retry policy treats as transient.

use async_trait::async_trait;
use forgepilot_core::error::ProviderError;
use forgepilot_core::provider::*;
use forgepilot_core::ratelimit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct RateLimitedProvider {
    inner: Arc<dyn Provider>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl RateLimitedProvider {
    pub fn new(inner: Arc<dyn Provider>, limiter: Arc<RateLimiter>, timeout: Duration) -> Self {
        Self {
            inner,
            limiter,
            timeout,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

#[async_trait]
impl Provider for RateLimitedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| ProviderError::NotConfigured("rate limiter closed".into()))?;

        match tokio::time::timeout(self.timeout, self.inner.complete(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    provider = %self.inner.name(),
                    timeout_secs = self.timeout.as_secs(),
                    "Provider call timed out"
                );
                Err(ProviderError::Timeout(format!(
                    "Provider '{}' timed out after {}s",
                    self.inner.name(),
                    self.timeout.as_secs()
                )))
            }
        }
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}

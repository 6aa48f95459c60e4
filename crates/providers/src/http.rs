//! Shared HTTP plumbing for the provider adapters.

use forgepilot_core::error::ProviderError;
use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Map a transport failure to the provider taxonomy.
pub(crate) fn send_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

/// Seconds from a `retry-after` header, when it holds a plain integer.
pub(crate) fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

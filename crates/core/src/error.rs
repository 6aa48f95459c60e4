//! Error types for the Forgepilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! The top-level [`Error`] carries the run-level taxonomy; each external
//! boundary (model API, repository host) has its own error type.

use thiserror::Error;

/// The top-level error type for all Forgepilot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Prompt errors ---
    #[error("Prompt budget exceeded: {required} tokens required, budget is {budget}")]
    BudgetExceeded { required: usize, budget: usize },

    // --- Context errors ---
    #[error("Context unavailable: {0}")]
    ContextUnavailable(String),

    // --- Model errors ---
    #[error("Model call failed: {0}")]
    ModelCall(#[from] ProviderError),

    #[error("Model response could not be parsed: {0}")]
    ResponseParse(String),

    // --- Action errors ---
    #[error("Action rejected: {action}: {reason}")]
    ActionRejected { action: String, reason: String },

    #[error("Action failed transiently: {action}: {reason}")]
    ActionTransient {
        action: String,
        reason: String,
        retry_after_secs: Option<u64>,
    },

    // --- Run errors ---
    #[error("Turn limit exceeded after {turns} turns without completion")]
    TurnLimitExceeded { turns: u32 },

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Run cancelled")]
    Cancelled,
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Errors raised by a [`RepositoryHost`](crate::repository::RepositoryHost).
#[derive(Debug, Clone, Error)]
pub enum RepoError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limited by repository host, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request rejected as invalid: {0}")]
    Invalid(String),

    #[error("Repository host error (status: {status})")]
    Server { status: u16 },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

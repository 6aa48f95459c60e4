//! # Forgepilot Core
//!
//! Domain types, traits, and error definitions for the Forgepilot repository
//! agent. This crate has no I/O of its own: it defines the model that every
//! other crate implements against.
//!
//! ## Boundaries
//!
//! The two external systems are traits here:
//! - [`Provider`] for the language-model API
//! - [`RepositoryHost`] for the code-hosting API
//!
//! Implementations live in `forgepilot-providers` and `forgepilot-github`,
//! which keeps the orchestrator testable with in-process doubles.

pub mod action;
pub mod context;
pub mod decision;
pub mod error;
pub mod event;
pub mod message;
pub mod prompt;
pub mod provider;
pub mod ratelimit;
pub mod repository;
pub mod retry;
pub mod run;
pub mod task;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use action::{Action, ExecutionOutcome, ExecutionResult, FileChange};
pub use context::{BlockSource, ContextBlock, RankKey};
pub use decision::{ContextRequest, DECISION_SCHEMA_VERSION, Decision, ModelResponse};
pub use error::{Error, ProviderError, RepoError, Result};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, Role};
pub use prompt::Prompt;
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use ratelimit::{RateLimiter, RatePermit};
pub use repository::RepositoryHost;
pub use retry::{RetryError, RetryPolicy, Retryable};
pub use run::{
    ActionRecord, FailureKind, FailureReason, RunOutcome, RunPhase, RunState, RunStatus,
    TurnRecord,
};
pub use task::{RepoRef, Task, TaskId, TaskTarget};

//! LLM Provider implementations for Forgepilot.
//!
//! All providers implement the `forgepilot_core::Provider` trait.
//! The router selects the correct provider based on configuration and wraps
//! it in the shared rate limiter.

mod http;

pub mod anthropic;
pub mod limited;
pub mod openai_compat;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use limited::RateLimitedProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, build_from_config};

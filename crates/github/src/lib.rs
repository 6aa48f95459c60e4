//! Repository-hosting adapters for Forgepilot.
//!
//! Both hosts implement `forgepilot_core::RepositoryHost`:
//! - [`GitHubClient`] talks to the GitHub REST API
//! - [`InMemoryHost`] keeps a single repository in process

pub mod client;
pub mod memory;

pub use client::GitHubClient;
pub use memory::InMemoryHost;

//! Configuration loading, validation, and management for Forgepilot.
//!
//! Loads configuration from `~/.forgepilot/config.toml` with environment
//! variable overrides. Validates all settings at startup; the resulting
//! [`AppConfig`] is read-only for the life of the process and is passed by
//! reference to every component.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use forgepilot_core::retry::RetryPolicy;

/// The root configuration structure.
///
/// Maps directly to `~/.forgepilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the default provider (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Verbose logging
    #[serde(default)]
    pub debug: bool,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Code-hosting API settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Orchestration loop and prompt budget settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Backoff for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Shared client budget
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_provider() -> String {
    "anthropic".into()
}
fn default_model() -> String {
    "claude-3-5-sonnet-20241022".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("debug", &self.debug)
            .field("providers", &self.providers)
            .field("github", &self.github)
            .field("agent", &self.agent)
            .field("retry", &self.retry)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_user_agent() -> String {
    format!("forgepilot/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_github_api_url(),
            user_agent: default_user_agent(),
        }
    }
}

impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &redact(&self.token))
            .field("api_url", &self.api_url)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Orchestration and prompt-budget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Loop iterations before a run fails with a turn-limit error
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Total prompt budget in estimated tokens
    #[serde(default = "default_context_budget")]
    pub context_budget_tokens: usize,

    /// The task text is never cut below this many tokens
    #[serde(default = "default_task_floor")]
    pub task_floor_tokens: usize,

    /// Most prior turns replayed to the model
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Share of the post-task allowance history may use (0.0..=1.0)
    #[serde(default = "default_history_share")]
    pub history_share: f32,

    /// Per-message character cap for replayed history
    #[serde(default = "default_history_turn_chars")]
    pub history_turn_chars: usize,

    /// Most context blocks pulled from the assembler per turn
    #[serde(default = "default_max_context_blocks")]
    pub max_context_blocks: usize,

    /// Content of a single block is cut at this many bytes
    #[serde(default = "default_max_block_chars")]
    pub max_block_chars: usize,

    /// Files larger than this are never candidates
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Candidate list is capped after scoring
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Consecutive unparseable responses tolerated before failing
    #[serde(default = "default_max_parse_failures")]
    pub max_parse_failures: u32,

    /// Replace the built-in identity prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_override: Option<String>,
}

fn default_max_turns() -> u32 {
    10
}
fn default_context_budget() -> usize {
    8192
}
fn default_task_floor() -> usize {
    256
}
fn default_history_turns() -> usize {
    4
}
fn default_history_share() -> f32 {
    0.25
}
fn default_history_turn_chars() -> usize {
    2000
}
fn default_max_context_blocks() -> usize {
    24
}
fn default_max_block_chars() -> usize {
    6000
}
fn default_max_file_bytes() -> u64 {
    100_000
}
fn default_max_candidates() -> usize {
    200
}
fn default_max_parse_failures() -> u32 {
    2
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            context_budget_tokens: default_context_budget(),
            task_floor_tokens: default_task_floor(),
            history_turns: default_history_turns(),
            history_share: default_history_share(),
            history_turn_chars: default_history_turn_chars(),
            max_context_blocks: default_max_context_blocks(),
            max_block_chars: default_max_block_chars(),
            max_file_bytes: default_max_file_bytes(),
            max_candidates: default_max_candidates(),
            max_parse_failures: default_max_parse_failures(),
            system_prompt_override: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// In-flight requests per client
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Minimum spacing between request starts
    #[serde(default)]
    pub min_interval_ms: u64,

    /// Per-request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_max_concurrent() -> usize {
    4
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            min_interval_ms: 0,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl RateLimitConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.forgepilot/config.toml).
    ///
    /// Environment variables override the file:
    /// - `FORGEPILOT_API_KEY`, then `ANTHROPIC_API_KEY`, then `OPENAI_API_KEY`
    /// - `GITHUB_TOKEN`
    /// - `FORGEPILOT_PROVIDER`, `FORGEPILOT_MODEL`
    /// - `FORGEPILOT_DEBUG` or `DEBUG` (`true`/`1`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // The provider decides which key variable is read first.
        if let Some(provider) = lookup("FORGEPILOT_PROVIDER") {
            self.default_provider = provider;
        }

        if self.api_key.is_none() {
            self.api_key = lookup("FORGEPILOT_API_KEY")
                .or_else(|| match self.default_provider.as_str() {
                    "openai" => lookup("OPENAI_API_KEY"),
                    _ => lookup("ANTHROPIC_API_KEY"),
                })
                .or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(token) = lookup("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }

        if let Some(model) = lookup("FORGEPILOT_MODEL") {
            self.default_model = model;
        }

        if let Some(flag) = lookup("FORGEPILOT_DEBUG").or_else(|| lookup("DEBUG")) {
            self.debug = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".forgepilot")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_turns must be at least 1".into(),
            ));
        }

        if self.agent.context_budget_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "agent.context_budget_tokens must be > 0".into(),
            ));
        }

        if self.agent.task_floor_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "agent.task_floor_tokens must be at least 1".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.agent.history_share) {
            return Err(ConfigError::ValidationError(
                "agent.history_share must be between 0.0 and 1.0".into(),
            ));
        }

        if self.agent.max_parse_failures == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_parse_failures must be at least 1".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }

        if self.rate_limit.max_concurrent == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.max_concurrent must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
            || self
                .providers
                .get(&self.default_provider)
                .is_some_and(|p| p.api_key.is_some())
    }

    pub fn has_github_token(&self) -> bool {
        self.github.token.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            debug: false,
            providers: HashMap::new(),
            github: GitHubConfig::default(),
            agent: AgentSettings::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

//! `forgepilot config`: Configuration management commands.

use forgepilot_config::{AppConfig, ConfigError};

const REDACTED: &str = "***";

/// Copy of `config` with every secret replaced.
pub fn redacted(config: &AppConfig) -> AppConfig {
    let mut config = config.clone();
    if config.api_key.is_some() {
        config.api_key = Some(REDACTED.into());
    }
    if config.github.token.is_some() {
        config.github.token = Some(REDACTED.into());
    }
    for provider in config.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = Some(REDACTED.into());
        }
    }
    config
}

/// Non-fatal problems worth reporting.
pub fn warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push(
            "No model API key set (set FORGEPILOT_API_KEY, ANTHROPIC_API_KEY or OPENAI_API_KEY)"
                .to_string(),
        );
    }
    if !config.has_github_token() {
        warnings.push("No GitHub token set (set GITHUB_TOKEN); actions will be rejected".to_string());
    }
    if config.agent.task_floor_tokens >= config.agent.context_budget_tokens {
        warnings.push(format!(
            "agent.task_floor_tokens ({}) leaves no room in agent.context_budget_tokens ({})",
            config.agent.task_floor_tokens, config.agent.context_budget_tokens
        ));
    }
    warnings
}

pub fn validate(config: Result<AppConfig, ConfigError>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match config {
        Ok(config) => {
            println!("   Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Provider:  {}", config.default_provider);
            println!("   Model:     {}", config.default_model);
            println!("   GitHub:    {}", config.github.api_url);
            println!("   Budget:    {} tokens", config.agent.context_budget_tokens);
            println!("   Turns:     {}", config.agent.max_turns);
            println!("   Retries:   {} attempts", config.retry.max_attempts);
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub fn show(config: Result<AppConfig, ConfigError>) -> Result<(), Box<dyn std::error::Error>> {
    let config = config.map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&redacted(&config))?;
    println!("{toml_str}");
    Ok(())
}

pub fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}

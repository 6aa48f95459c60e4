//! Forgepilot CLI: the main entry point.
//!
//! Commands:
//! - `run`: Execute one task against a repository
//! - `analyze`: Score prompts and show their optimized form
//! - `config`: Show, locate or validate the configuration

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use forgepilot_config::AppConfig;
use forgepilot_core::run::RunStatus;

mod commands;

#[derive(Parser)]
#[command(
    name = "forgepilot",
    about = "Forgepilot: prompt-optimizing agent orchestration for GitHub",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task against a repository
    Run(commands::run::RunArgs),

    /// Analyze prompt quality and show the optimized task text
    Analyze {
        /// One or more prompts to analyze
        #[arg(required = true)]
        prompts: Vec<String>,

        /// Rewriting technique to apply, in order (repeatable; default: clarity, structure)
        #[arg(long = "technique", short = 't', value_name = "NAME")]
        techniques: Vec<forgepilot_agent::Technique>,

        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Print the config file path
    Path,
    /// Validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Config is loaded before tracing so `debug = true` can raise the level;
    // load errors are reported after the subscriber is up.
    let config = AppConfig::load();
    let debug = cli.verbose || config.as_ref().is_ok_and(|c| c.debug);

    let filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config).map(|()| RunStatus::Succeeded),
            ConfigAction::Path => commands::config_cmd::path().map(|()| RunStatus::Succeeded),
            ConfigAction::Validate => {
                commands::config_cmd::validate(config).map(|()| RunStatus::Succeeded)
            }
        },
        Commands::Analyze {
            prompts,
            techniques,
            json,
        } => match config {
            Ok(config) => commands::analyze::run(&prompts, &techniques, &config, json)
                .map(|()| RunStatus::Succeeded),
            Err(e) => Err(format!("Failed to load config: {e}").into()),
        },
        Commands::Run(args) => match config {
            Ok(config) => commands::run::run(args, config).await,
            Err(e) => Err(format!("Failed to load config: {e}").into()),
        },
    };

    match result {
        Ok(status) => exit_code(status),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// 0 on success, 1 on failure, 130 when interrupted.
fn exit_code(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Succeeded => ExitCode::SUCCESS,
        RunStatus::Failed => ExitCode::FAILURE,
        RunStatus::Aborted => ExitCode::from(130),
    }
}

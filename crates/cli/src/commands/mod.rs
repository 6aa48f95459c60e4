//! CLI subcommand implementations.

pub mod analyze;
pub mod config_cmd;
pub mod run;

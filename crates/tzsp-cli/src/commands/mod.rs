//! CLI commands

pub mod completions;
pub mod config;
pub mod run;

use clap::Subcommand;

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Receive TZSP datagrams and run the analyzers (default)
    Run(run::RunArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

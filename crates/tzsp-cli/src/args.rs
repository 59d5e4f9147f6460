//! Command-line argument parsing

use clap::{Parser, ValueEnum};
use std::path::Path;

use crate::commands::run::RunArgs;
use crate::commands::Command;

/// tzsp-server - TZSP receiver with hot-reloadable analyzer plugins
///
/// Receives TZSP-encapsulated captures over UDP and runs every recovered
/// frame through a chain of analyzers loaded from plugin modules. Modules
/// are reloaded when their file changes.
#[derive(Parser, Debug)]
#[command(name = "tzsp-server")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Args {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Options for the default run command
    #[command(flatten)]
    pub run: RunArgs,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log level filter (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", env = "TZSP_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Output format for logs
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormat>,

    /// Log file path
    #[arg(long, value_name = "FILE", global = true)]
    pub log_file: Option<String>,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text
    Text,
    /// JSON format
    Json,
    /// Compact format
    Compact,
}

impl LogFormat {
    /// Parse a format name from the configuration file
    pub fn from_name(name: &str) -> Option<Self> {
        Self::from_str(name, true).ok()
    }
}

impl Args {
    /// Configuration file the run command will read, if any
    pub fn config_file(&self) -> Option<&Path> {
        match &self.command {
            Some(Command::Run(run)) => run.config.as_deref(),
            Some(_) => None,
            None => self.run.config.as_deref(),
        }
    }
}

//! tzsp-server CLI
//!
//! Command-line entry point for the TZSP receiver.

mod args;
mod commands;
mod logging;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing::error;
use tzsp_core::Config;

use args::Args;
use commands::Command;

fn main() -> Result<()> {
    let args = Args::parse();

    // The [logging] section of the config file is a fallback for CLI flags.
    let file_logging = args
        .config_file()
        .map(ToOwned::to_owned)
        .or_else(commands::config::find_config_file)
        .and_then(|path| Config::load(path).ok())
        .map(|config| config.logging);
    logging::init(&args, file_logging.as_ref())?;

    let result = run(args);

    if let Err(ref e) = result {
        error!("Fatal error: {:#}", e);
    }

    result
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Some(Command::Run(run_args)) => {
            print_banner();
            commands::run::execute(run_args)
        }
        Some(Command::Config(config_args)) => commands::config::execute(config_args),
        Some(Command::Completions(comp_args)) => commands::completions::execute(comp_args),
        None => {
            print_banner();
            commands::run::execute(args.run)
        }
    }
}

fn print_banner() {
    eprintln!(
        "{} {}",
        "tzsp-server".green().bold(),
        env!("CARGO_PKG_VERSION").cyan()
    );
}

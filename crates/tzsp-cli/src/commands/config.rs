//! Config command - configuration management

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;
use tzsp_core::config::Config;

const FILE_NAME: &str = "tzsp-server.toml";

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Config file to show (default: detect)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with default values
    Generate {
        /// Output file path
        #[arg(short, long, default_value = FILE_NAME)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Config file to validate
        file: PathBuf,
    },

    /// Show config file locations
    Paths,
}

/// Execute config command
pub fn execute(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show { file } => show_config(file),
        ConfigAction::Generate { output, force } => generate_config(output, force),
        ConfigAction::Validate { file } => validate_config(file),
        ConfigAction::Paths => show_paths(),
    }
}

fn show_config(file: Option<PathBuf>) -> Result<()> {
    let config = match file.or_else(find_config_file) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    let toml_str = config.to_toml().context("Failed to serialize config")?;
    println!("{toml_str}");
    Ok(())
}

fn generate_config(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists, use --force to overwrite",
            output.display()
        );
    }

    let toml_str = Config::default()
        .to_toml()
        .context("Failed to serialize config")?;

    let content = format!(
        "# tzsp-server configuration\n\
         # Command-line options override these values\n\n\
         {toml_str}"
    );

    std::fs::write(&output, content)
        .with_context(|| format!("Failed to write config to {}", output.display()))?;

    info!(path = %output.display(), "Generated config file");
    println!("Configuration file generated: {}", output.display());
    Ok(())
}

fn validate_config(file: PathBuf) -> Result<()> {
    let config = Config::load(&file)
        .with_context(|| format!("Failed to load config from {}", file.display()))?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{} Configuration is valid", "✓".green());
    println!("  Endpoint: {}", config.server.endpoint());
    println!("  Dispatch: {:?}", config.dispatch.mode);
    println!("  Analyzer modules: {}", config.plugins.paths.len());
    println!("  Hot reload: {}", config.plugins.hot_reload);

    Ok(())
}

fn show_paths() -> Result<()> {
    println!("Configuration file search paths:");
    println!();
    println!("  1. ./{FILE_NAME}");

    if let Some(dirs) = project_dirs() {
        println!("  2. {}", dirs.config_dir().join(FILE_NAME).display());
    }

    Ok(())
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "tzsp-server")
}

/// Find a configuration file in the search paths
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(FILE_NAME);
    if local.exists() {
        return Some(local);
    }

    project_dirs()
        .map(|dirs| dirs.config_dir().join(FILE_NAME))
        .filter(|path| path.exists())
}

//! Logging initialization

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};
use tzsp_core::config::LoggingConfig;

use crate::args::{Args, LogFormat};

/// Initialize logging from CLI arguments, falling back to the config file's
/// `[logging]` section
pub fn init(args: &Args, file_config: Option<&LoggingConfig>) -> Result<()> {
    let defaults = LoggingConfig::default();
    let config = file_config.unwrap_or(&defaults);

    let level = if args.quiet {
        "error".to_string()
    } else {
        match args.verbose {
            0 => args.log_level.clone().unwrap_or_else(|| config.level.clone()),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    };

    let env_filter = EnvFilter::builder()
        .parse(&level)
        .with_context(|| format!("Invalid log level: {level}"))?;
    // RUST_LOG directives still apply on top of the chosen level
    let env_filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => directives
            .split(',')
            .filter_map(|d| d.parse::<Directive>().ok())
            .fold(env_filter, EnvFilter::add_directive),
        Err(_) => env_filter,
    };

    let format = args
        .log_format
        .or_else(|| LogFormat::from_name(&config.format))
        .unwrap_or(LogFormat::Text);

    let log_file = args
        .log_file
        .clone()
        .or_else(|| config.file.as_ref().map(|p| p.display().to_string()));
    let file = log_file
        .as_ref()
        .map(|path| {
            std::fs::File::create(path)
                .map(Arc::new)
                .with_context(|| format!("Failed to create log file: {path}"))
        })
        .transpose()?;

    match format {
        LogFormat::Text => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .with_target(args.verbose >= 2)
                    .with_thread_names(args.verbose >= 2)
                    .with_file(args.verbose >= 3)
                    .with_line_number(args.verbose >= 3),
            );

            if let Some(file) = file {
                subscriber
                    .with(fmt::layer().with_ansi(false).with_writer(file))
                    .init();
            } else {
                subscriber.init();
            }
        }
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json());

            if let Some(file) = file {
                subscriber.with(fmt::layer().json().with_writer(file)).init();
            } else {
                subscriber.init();
            }
        }
        LogFormat::Compact => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact());

            if let Some(file) = file {
                subscriber
                    .with(fmt::layer().compact().with_ansi(false).with_writer(file))
                    .init();
            } else {
                subscriber.init();
            }
        }
    }

    Ok(())
}

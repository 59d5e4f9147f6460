//! Run command - receive and analyze

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tzsp_core::config::{Config, DispatchMode};
use tzsp_core::{DylibLoader, Server};

use super::config::find_config_file;

/// Run command arguments
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Configuration file
    #[arg(short = 'c', long, value_name = "FILE", env = "TZSP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, value_name = "ADDRESS")]
    pub listen_address: Option<String>,

    /// UDP port to listen on
    #[arg(short = 'p', long, env = "TZSP_PORT")]
    pub port: Option<u16>,

    /// Analyzer plugin module; repeat for several, they run in order
    #[arg(short = 'a', long = "analyzer", value_name = "MODULE")]
    pub analyzers: Vec<PathBuf>,

    /// Socket receive buffer size in bytes
    #[arg(long, value_name = "BYTES")]
    pub buffer_size: Option<usize>,

    /// Socket receive timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Dispatch strategy
    #[arg(long, value_enum)]
    pub dispatch: Option<DispatchArg>,

    /// Ring buffer capacity for queued dispatch
    #[arg(long, value_name = "N")]
    pub queue_size: Option<usize>,

    /// Do not reload analyzer modules when they change
    #[arg(long)]
    pub no_hot_reload: bool,

    /// Module change polling interval in milliseconds
    #[arg(long, value_name = "MS")]
    pub poll_interval: Option<u64>,
}

/// Dispatch strategy names
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DispatchArg {
    /// Analyze on the receive thread
    Inline,
    /// Analyze on a worker thread behind a ring buffer
    Queued,
}

impl From<DispatchArg> for DispatchMode {
    fn from(arg: DispatchArg) -> Self {
        match arg {
            DispatchArg::Inline => Self::Inline,
            DispatchArg::Queued => Self::Queued,
        }
    }
}

/// Execute the run command
pub fn execute(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    config.validate().context("Configuration validation failed")?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let mut server = Server::start(&config, Arc::new(DylibLoader::new()))
        .context("Failed to start server")?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    server.shutdown();
    info!("tzsp-server stopped");
    Ok(())
}

/// Build the effective configuration: file (or defaults), then CLI overrides
pub fn load_config(args: &RunArgs) -> Result<Config> {
    let mut config = match args.config.clone().or_else(find_config_file) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(ref address) = args.listen_address {
        config.server.listen_address = address.clone();
    }

    if let Some(port) = args.port {
        config.server.port = port;
    }

    if let Some(size) = args.buffer_size {
        config.server.buffer_size = size;
    }

    if let Some(timeout) = args.timeout {
        config.server.timeout_ms = timeout;
    }

    if let Some(mode) = args.dispatch {
        config.dispatch.mode = mode.into();
    }

    if let Some(size) = args.queue_size {
        config.dispatch.queue_size = size;
    }

    if !args.analyzers.is_empty() {
        config.plugins.paths = args.analyzers.clone();
    }

    if args.no_hot_reload {
        config.plugins.hot_reload = false;
    }

    if let Some(interval) = args.poll_interval {
        config.plugins.poll_interval_ms = interval;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            "[server]\nport = 4000\ntimeout_ms = 100\n\n[plugins]\npaths = [\"from-file.so\"]\n",
        )
        .unwrap();

        let args = RunArgs {
            config: Some(path),
            port: Some(5000),
            dispatch: Some(DispatchArg::Queued),
            analyzers: vec!["cli.so".into()],
            no_hot_reload: true,
            ..RunArgs::default()
        };
        let config = load_config(&args).unwrap();

        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.timeout_ms, 100);
        assert_eq!(config.dispatch.mode, DispatchMode::Queued);
        assert_eq!(config.plugins.paths, vec![PathBuf::from("cli.so")]);
        assert!(!config.plugins.hot_reload);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let args = RunArgs {
            config: Some("/nonexistent/tzsp-server.toml".into()),
            ..RunArgs::default()
        };
        assert!(load_config(&args).is_err());
    }
}

//! Configuration management for tzsp-server
//!
//! Provides a strongly-typed configuration system with TOML support.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

/// Default UDP port for TZSP
pub const DEFAULT_PORT: u16 = 37008;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Socket settings
    pub server: ServerConfig,

    /// Dispatch strategy settings
    pub dispatch: DispatchConfig,

    /// Analyzer plugin modules
    pub plugins: PluginsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| Error::ConfigNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Error::from)
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::config_value("server.port", "Must be between 1 and 65535"));
        }

        if self.server.buffer_size == 0 {
            return Err(Error::config_value("server.buffer_size", "Must be greater than 0"));
        }

        if self.server.timeout_ms == 0 {
            return Err(Error::config_value("server.timeout_ms", "Must be greater than 0"));
        }

        if self.dispatch.mode == DispatchMode::Queued && self.dispatch.queue_size == 0 {
            return Err(Error::config_value(
                "dispatch.queue_size",
                "Must be greater than 0 for queued dispatch",
            ));
        }

        if self.plugins.hot_reload && self.plugins.poll_interval_ms == 0 {
            return Err(Error::config_value(
                "plugins.poll_interval_ms",
                "Must be greater than 0 when hot reload is enabled",
            ));
        }

        for path in &self.plugins.paths {
            if !path.is_file() {
                return Err(Error::PluginNotFound { path: path.clone() });
            }
        }

        Ok(())
    }
}

/// Socket settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen_address: String,
    /// UDP port
    pub port: u16,
    /// Socket receive buffer size and maximum datagram size, in bytes
    pub buffer_size: usize,
    /// Socket receive timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            buffer_size: 1024 * 1024,
            timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    /// Endpoint to bind
    ///
    /// An address that does not parse falls back to all IPv4 interfaces.
    pub fn endpoint(&self) -> SocketAddr {
        let ip = self.listen_address.parse::<IpAddr>().unwrap_or_else(|_| {
            warn!(
                address = %self.listen_address,
                "Can't parse listen address, listening on all interfaces"
            );
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        });
        SocketAddr::new(ip, self.port)
    }

    /// Socket receive timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// How datagrams reach the analyzer chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Decode and analyze on the receive thread
    #[default]
    Inline,
    /// Buffer datagrams for a dedicated worker thread
    Queued,
}

/// Dispatch strategy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Dispatch strategy
    pub mode: DispatchMode,
    /// Ring buffer capacity for queued dispatch
    pub queue_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Inline,
            queue_size: 50_000,
        }
    }
}

/// Analyzer plugin modules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Module paths, in chain order
    pub paths: Vec<PathBuf>,
    /// Reload modules when their file changes
    pub hot_reload: bool,
    /// Modification time polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            hot_reload: true,
            poll_interval_ms: 300,
        }
    }
}

impl PluginsConfig {
    /// Hot reload polling interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (error, warn, info, debug, trace)
    pub level: String,
    /// Output format (text, json, compact)
    pub format: String,
    /// Log file path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 37008);
        assert_eq!(config.server.buffer_size, 1_048_576);
        assert_eq!(config.server.timeout_ms, 5000);
        assert_eq!(config.dispatch.mode, DispatchMode::Inline);
        assert_eq!(config.dispatch.queue_size, 50_000);
        assert_eq!(config.plugins.poll_interval_ms, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 4000

            [dispatch]
            mode = "queued"
            queue_size = 16
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.listen_address, "0.0.0.0");
        assert_eq!(config.dispatch.mode, DispatchMode::Queued);
        assert_eq!(config.dispatch.queue_size, 16);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = Config::default();
        config.plugins.paths.push(PathBuf::from("/opt/analyzers/libflows.so"));
        let text = config.to_toml().unwrap();
        assert_eq!(Config::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dispatch.mode = DispatchMode::Queued;
        config.dispatch.queue_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.plugins.paths.push(PathBuf::from("/nonexistent/libnothing.so"));
        assert!(matches!(
            config.validate(),
            Err(Error::PluginNotFound { .. })
        ));
    }

    #[test]
    fn test_endpoint_fallback() {
        let mut server = ServerConfig::default();
        server.listen_address = "not-an-ip".to_string();
        assert_eq!(server.endpoint().to_string(), "0.0.0.0:37008");

        server.listen_address = "::1".to_string();
        assert_eq!(server.endpoint().to_string(), "[::1]:37008");
    }
}

//! Error types for tzsp-core
//!
//! Centralized error handling using `thiserror` for ergonomic error definitions.

use std::path::PathBuf;
use thiserror::Error;
use tzsp_analyzer_api::ApiReference;

/// Malformed TZSP header; affects a single datagram only
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes than the fixed header
    #[error("TZSP datagram too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum header length
        expected: usize,
        /// Datagram length
        actual: usize,
    },

    /// Unsupported protocol version
    #[error("TZSP version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Supported version
        expected: u8,
        /// Version in the datagram
        actual: u8,
    },

    /// Type field outside 0..=5
    #[error("Invalid TZSP type value {0}")]
    InvalidType(u8),

    /// Tagged fields ran past the end of the datagram before the end tag
    #[error("TZSP tagged fields truncated at offset {offset} of {length}")]
    Truncated {
        /// Offset of the tag that could not be read in full
        offset: usize,
        /// Datagram length
        length: usize,
    },
}

/// Main error type for tzsp-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// TZSP decoding failed
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Plugin module file does not exist
    #[error("Plugin module not found: {}", path.display())]
    PluginNotFound {
        /// Path of the missing module
        path: PathBuf,
    },

    /// Plugin module could not be opened
    #[error("Failed to load plugin module '{}': {message}", path.display())]
    PluginLoad {
        /// Module path
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Manifest is missing, empty or names unknown analyzer types
    #[error("Invalid manifest in plugin module '{}': {message}", path.display())]
    InvalidManifest {
        /// Module path
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Module was built against another analyzer API
    #[error("Analyzer API version mismatch: host has {host}, plugin has {plugin}")]
    ApiVersionMismatch {
        /// API the host was built with
        host: ApiReference,
        /// API the module was built with
        plugin: String,
    },

    /// An analyzer constructor failed
    #[error("Can't instantiate analyzer of type '{type_id}': {message}")]
    PluginInstantiation {
        /// Analyzer type id from the manifest
        type_id: String,
        /// Constructor error, including its causes
        message: String,
    },

    /// An analyzer failed while handling a frame
    #[error("Analyzer '{analyzer}' failed: {message}")]
    ChainExecution {
        /// Analyzer type id
        analyzer: String,
        /// Error message
        message: String,
    },

    /// Frame handed to a plugin host that was already disposed
    #[error("Plugin module '{}' has been disposed", path.display())]
    PluginDisposed {
        /// Module path
        path: PathBuf,
    },

    /// Socket setup or receive failure
    #[error("Socket error ({operation}): {source}")]
    Socket {
        /// What was being done
        operation: &'static str,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Ring buffer capacity must be positive
    #[error("Invalid ring buffer capacity: {capacity} (must be > 0)")]
    InvalidCapacity {
        /// Requested capacity
        capacity: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// Path to the missing config file
        path: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    ConfigValue {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a plugin load error
    pub fn plugin_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PluginLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid manifest error
    pub fn invalid_manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a chain execution error
    pub fn chain_execution(analyzer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ChainExecution {
            analyzer: analyzer.into(),
            message: message.into(),
        }
    }

    /// Create a socket error
    pub fn socket(operation: &'static str, source: std::io::Error) -> Self {
        Self::Socket { operation, source }
    }

    /// Create a config value error
    pub fn config_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether the error concerns only the datagram being dispatched
    pub fn is_per_datagram(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::ChainExecution { .. })
    }
}

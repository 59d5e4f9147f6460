//! # TZSP Core
//!
//! Receives TZSP-encapsulated captures over UDP and runs the recovered frames
//! through hot-reloadable analyzer plugins.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **TZSP decoding** - header parsing into a link layer and a payload view
//! - **Ring buffer** - lossy fixed-capacity FIFO for the queued strategy
//! - **Plugin host** - module loading, analyzer chains and hot reload
//! - **Dispatch** - inline and queued packet dispatch strategies
//! - **Server** - the UDP listener and its receive loop
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tzsp_core::{Config, DylibLoader, Server};
//!
//! let mut config = Config::load("tzsp-server.toml")?;
//! config.plugins.paths.push("/opt/analyzers/libflows.so".into());
//!
//! let mut server = Server::start(&config, Arc::new(DylibLoader::new()))?;
//! // ... wait for a shutdown signal
//! server.shutdown();
//! # Ok::<(), tzsp_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod plugin;
pub mod server;
pub mod tzsp;

// Re-exports for convenience
pub use buffer::RingBuffer;
pub use config::{Config, DispatchMode};
pub use dispatch::{Dispatcher, Disposition, InlineDispatcher, QueuedDispatcher, RawDatagram};
pub use error::{Error, ProtocolError, Result};
pub use plugin::{
    AnalyzerChain, AnalyzerHost, ChainHandler, ChainOutcome, DylibLoader, HotReloadChain,
    ModuleLoader, StaticLoader,
};
pub use server::{Listener, ListenerHandle, Server};
pub use tzsp_analyzer_api as api;

//! # TZSP Analyzer API
//!
//! The contract between `tzsp-server` and its analyzer plugin modules.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Frames** - the decoded link-layer frame handed to analyzers
//! - **Analyzers** - the [`Analyzer`] trait and its [`ChainResult`] flow control
//! - **Plugin descriptors** - the exported [`PluginDescriptor`] the host reads
//!   when it loads a module
//! - **Layer helpers** - Ethernet/IP/transport views built on `pnet_packet`
//!
//! ## Writing a plugin
//!
//! ```rust,ignore
//! use tzsp_analyzer_api::*;
//!
//! #[derive(Default)]
//! pub struct Counter { seen: u64 }
//!
//! impl Analyzer for Counter {
//!     fn handle(
//!         &mut self,
//!         _frame: &Frame<'_>,
//!         _context: Option<&AnalysisContext>,
//!         _cancel: &CancellationToken,
//!     ) -> Result<ChainResult, AnalyzerError> {
//!         self.seen += 1;
//!         Ok(ChainResult::Continue)
//!     }
//! }
//!
//! export_analyzers!(Counter);
//! ```
//!
//! The plugin crate is built as a `cdylib` against the same version of this
//! crate, and with the same compiler, as the host; the host refuses anything
//! else. Analyzers exported through [`export_analyzers!`] are wrapped in
//! [`Guarded`] so a panic inside the module surfaces as an [`AnalyzerError`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod analyzer;
mod frame;
pub mod layers;
mod plugin;

pub use analyzer::{AnalysisContext, Analyzer, AnalyzerError, CancellationToken, ChainResult};
pub use frame::{Frame, LinkLayer};
pub use layers::{Filtered, LayerAnalyzer, Layers, TransportKind};
pub use plugin::{
    attach_logger, default_factory, panic_message, AnalyzerFactory, ApiReference, CreateFn,
    Guarded, PluginDescriptor, API_NAME, API_VERSION, DESCRIPTOR_SYMBOL, RUSTC_VERSION,
};

//! Analyzer plugin hosting
//!
//! A plugin module is loaded through a [`ModuleLoader`] into an
//! [`AnalyzerChain`]. Each configured module is wrapped in a
//! [`HotReloadChain`], and the wrappers run in order inside an
//! [`AnalyzerHost`].

mod chain;
mod loader;
mod reload;

pub use chain::{AnalyzerChain, ChainOutcome};
pub use loader::{DylibLoader, ModuleLoader, PluginModule, StaticLoader};
pub use reload::HotReloadChain;

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use tzsp_analyzer_api::{CancellationToken, Frame};

use crate::config::PluginsConfig;
use crate::error::Result;

/// Something that can run analyzers over a decoded frame
pub trait ChainHandler: Send + Sync {
    /// Run over one frame
    fn handle(&self, frame: &Frame<'_>, cancel: &CancellationToken) -> Result<ChainOutcome>;
}

impl ChainHandler for HotReloadChain {
    fn handle(&self, frame: &Frame<'_>, cancel: &CancellationToken) -> Result<ChainOutcome> {
        HotReloadChain::handle(self, frame, cancel)
    }
}

/// Ordered set of plugin modules
///
/// Every module's chain starts without a context. A module that stops the
/// frame keeps the modules after it from seeing it.
#[derive(Default)]
pub struct AnalyzerHost {
    modules: Vec<HotReloadChain>,
}

impl AnalyzerHost {
    /// Create a host with no modules
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every configured module, in order
    ///
    /// Any load failure is returned; modules loaded before it are disposed.
    #[instrument(skip_all, fields(modules = config.paths.len()))]
    pub fn load(config: &PluginsConfig, loader: Arc<dyn ModuleLoader>) -> Result<Self> {
        let poll_interval = config.hot_reload.then(|| config.poll_interval());
        let mut host = Self::new();

        for path in &config.paths {
            host.add(HotReloadChain::new(
                Arc::clone(&loader),
                path.clone(),
                poll_interval,
            )?);
        }

        if host.is_empty() {
            warn!("No analyzers configured, datagrams will only be decoded");
        } else {
            info!(
                modules = host.len(),
                hot_reload = config.hot_reload,
                "Analyzer host ready"
            );
        }
        Ok(host)
    }

    /// Append a module
    pub fn add(&mut self, module: HotReloadChain) {
        self.modules.push(module);
    }

    /// Number of modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check whether no module is loaded
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module paths in chain order
    pub fn paths(&self) -> Vec<PathBuf> {
        self.modules.iter().map(|m| m.path().to_path_buf()).collect()
    }

    /// Dispose every module
    pub fn dispose(&self) {
        for module in &self.modules {
            module.dispose();
        }
    }
}

impl ChainHandler for AnalyzerHost {
    fn handle(&self, frame: &Frame<'_>, cancel: &CancellationToken) -> Result<ChainOutcome> {
        for module in &self.modules {
            if module.handle(frame, cancel)? == ChainOutcome::Dropped {
                return Ok(ChainOutcome::Dropped);
            }
        }
        Ok(ChainOutcome::Continued)
    }
}

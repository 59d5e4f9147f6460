//! One generation of an analyzer chain

use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, trace};
use tzsp_analyzer_api::{
    panic_message, AnalysisContext, Analyzer, AnalyzerError, ApiReference, CancellationToken,
    ChainResult, Frame,
};

use super::loader::{ModuleLoader, PluginModule};
use crate::error::{Error, Result};

/// How a chain finished with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Every analyzer ran
    Continued,
    /// An analyzer stopped the chain
    Dropped,
}

struct Slot {
    type_id: String,
    analyzer: Box<dyn Analyzer>,
}

/// Ordered analyzer instances built from one load of a plugin module
///
/// Dropping the chain disposes it.
pub struct AnalyzerChain {
    path: PathBuf,
    generation: u64,
    analyzers: Vec<Slot>,
    // `None` once disposed. Must outlive every `Slot`.
    module: Option<Box<dyn PluginModule>>,
}

impl AnalyzerChain {
    /// Load the module at `path` and build its chain
    ///
    /// Fails without returning a partial chain if the module targets another
    /// analyzer API, has an empty or unresolvable manifest, or an analyzer
    /// cannot be constructed.
    #[instrument(skip(loader), fields(path = %path.display()))]
    pub fn load(loader: &dyn ModuleLoader, path: &Path, generation: u64) -> Result<Self> {
        let module = loader.load(path)?;
        let descriptor = module.descriptor();

        if descriptor.api != ApiReference::CURRENT {
            return Err(Error::ApiVersionMismatch {
                host: ApiReference::CURRENT,
                plugin: descriptor.api.to_string(),
            });
        }

        if descriptor.manifest.is_empty() {
            return Err(Error::invalid_manifest(path, "manifest lists no analyzers"));
        }

        let mut factories = Vec::with_capacity(descriptor.manifest.len());
        for type_id in descriptor.manifest {
            let factory = descriptor.factory(type_id).ok_or_else(|| {
                Error::invalid_manifest(
                    path,
                    format!("'{type_id}' is not a constructible analyzer type"),
                )
            })?;
            factories.push(*factory);
        }

        tracing::dispatcher::get_default(|dispatch| module.attach_logger(dispatch.clone()));

        let mut chain = Self {
            path: path.to_path_buf(),
            generation,
            analyzers: Vec::with_capacity(factories.len()),
            module: Some(module),
        };

        // On failure `chain` is dropped here, disposing what was already built.
        for factory in factories {
            let analyzer = panic::catch_unwind(factory.create)
                .unwrap_or_else(|payload| Err(AnalyzerError::new(panic_message(payload.as_ref()))))
                .map_err(|e| Error::PluginInstantiation {
                    type_id: factory.type_id.to_string(),
                    message: error_chain(&e),
                })?;
            chain.analyzers.push(Slot {
                type_id: factory.type_id.to_string(),
                analyzer,
            });
        }

        info!(
            generation,
            analyzers = ?chain.analyzer_names(),
            "Loaded analyzer chain"
        );
        Ok(chain)
    }

    /// Run the chain over one frame
    ///
    /// Each call starts with no context. A context set by one analyzer is
    /// seen by the analyzers after it and discarded when the call returns.
    pub fn handle(&mut self, frame: &Frame<'_>, cancel: &CancellationToken) -> Result<ChainOutcome> {
        let mut context: Option<AnalysisContext> = None;

        for slot in &mut self.analyzers {
            if cancel.is_cancelled() {
                trace!(counter = frame.counter, "Cancelled, skipping remaining analyzers");
                return Ok(ChainOutcome::Dropped);
            }

            // Exported analyzers catch their own panics. This covers analyzers
            // linked into the host, which share its panic runtime.
            let analyzer = &mut slot.analyzer;
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                analyzer.handle(frame, context.as_ref(), cancel)
            }))
            .map_err(|payload| Error::chain_execution(&slot.type_id, panic_message(payload.as_ref())))?
            .map_err(|e| Error::chain_execution(&slot.type_id, error_chain(&e)))?;

            match result {
                ChainResult::Continue => {}
                ChainResult::ContinueWithNewContext(next) => context = Some(next),
                ChainResult::Stop => {
                    trace!(counter = frame.counter, analyzer = %slot.type_id, "Chain stopped");
                    return Ok(ChainOutcome::Dropped);
                }
            }
        }

        Ok(ChainOutcome::Continued)
    }

    /// Dispose every analyzer, then unload the module
    ///
    /// Disposal failures are logged and do not stop the remaining analyzers
    /// from being disposed. Calling this more than once has no effect.
    pub fn dispose(&mut self) {
        let Some(module) = self.module.take() else {
            return;
        };

        for slot in &mut self.analyzers {
            let analyzer = &mut slot.analyzer;
            match panic::catch_unwind(AssertUnwindSafe(|| analyzer.dispose())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(analyzer = %slot.type_id, error = %e, "Error on disposing analyzer");
                }
                Err(payload) => {
                    error!(
                        analyzer = %slot.type_id,
                        panic = %panic_message(payload.as_ref()),
                        "Analyzer panicked while disposing"
                    );
                }
            }
        }

        self.analyzers.clear();
        drop(module);
        debug!(
            path = %self.path.display(),
            generation = self.generation,
            "Analyzer chain disposed"
        );
    }

    /// Analyzer type ids in chain order
    pub fn analyzer_names(&self) -> Vec<&str> {
        self.analyzers.iter().map(|s| s.type_id.as_str()).collect()
    }

    /// Number of analyzers
    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    /// Check whether the chain has no analyzers (only after disposal)
    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// Load generation this chain was built in
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Module path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check whether [`dispose`](Self::dispose) has run
    pub fn is_disposed(&self) -> bool {
        self.module.is_none()
    }
}

impl Drop for AnalyzerChain {
    fn drop(&mut self) {
        self.dispose();
    }
}

// Errors leave the chain as plain strings: values and vtables created by a
// module must not outlive its unloading.
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

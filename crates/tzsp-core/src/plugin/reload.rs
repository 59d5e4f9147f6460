//! Hot-reloading wrapper around [`AnalyzerChain`]
//!
//! A poller thread watches the module file's modification time. A newer file
//! is loaded into a new chain off the dispatch path and swapped in under the
//! active-chain lock. Dispatches hold their own reference to the chain they
//! started with, so a superseded generation is disposed when its last
//! in-flight dispatch finishes rather than at swap time.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info};
use tzsp_analyzer_api::{CancellationToken, Frame};

use super::chain::{AnalyzerChain, ChainOutcome};
use super::loader::ModuleLoader;
use crate::error::{Error, Result};

type ActiveChain = Arc<Mutex<AnalyzerChain>>;

struct Shared {
    path: PathBuf,
    loader: Arc<dyn ModuleLoader>,
    active: Mutex<Option<ActiveChain>>,
    generation: AtomicU64,
}

impl Shared {
    fn current(&self) -> Option<ActiveChain> {
        self.active.lock().clone()
    }

    /// Reload if the file changed since `last_modified`
    fn poll(&self, last_modified: &mut Option<SystemTime>) {
        let modified = match modified_time(&self.path) {
            Ok(modified) => modified,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Can't read plugin modification time");
                return;
            }
        };

        if last_modified.is_some_and(|last| modified <= last) {
            return;
        }

        info!(path = %self.path.display(), "Plugin module changed, reloading");
        let generation = self.generation.load(Ordering::Acquire) + 1;

        match AnalyzerChain::load(self.loader.as_ref(), &self.path, generation) {
            Ok(chain) => {
                let previous = {
                    let mut active = self.active.lock();
                    if active.is_none() {
                        // Disposed while loading
                        return;
                    }
                    active.replace(Arc::new(Mutex::new(chain)))
                };
                self.generation.store(generation, Ordering::Release);
                *last_modified = Some(modified);
                info!(path = %self.path.display(), generation, "Plugin module reloaded");
                // Disposed here unless a dispatch still holds it.
                drop(previous);
            }
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %e,
                    "Can't reload plugin module, keeping the previous chain"
                );
            }
        }
    }
}

struct Poller {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// An analyzer chain that follows changes to its module file
pub struct HotReloadChain {
    shared: Arc<Shared>,
    poller: Mutex<Option<Poller>>,
}

impl HotReloadChain {
    /// Load the module at `path`
    ///
    /// With a `poll_interval` the module file is watched and reloaded when it
    /// changes. Errors from this initial load are returned; errors from later
    /// reloads are logged and the previous chain stays active.
    pub fn new(
        loader: Arc<dyn ModuleLoader>,
        path: impl Into<PathBuf>,
        poll_interval: Option<Duration>,
    ) -> Result<Self> {
        let path = path.into();
        let last_modified = modified_time(&path).ok();
        let chain = AnalyzerChain::load(loader.as_ref(), &path, 1)?;

        let shared = Arc::new(Shared {
            path,
            loader,
            active: Mutex::new(Some(Arc::new(Mutex::new(chain)))),
            generation: AtomicU64::new(1),
        });

        let poller = match poll_interval {
            Some(interval) => Some(spawn_poller(Arc::clone(&shared), interval, last_modified)?),
            None => None,
        };

        Ok(Self {
            shared,
            poller: Mutex::new(poller),
        })
    }

    /// Run the active chain over one frame
    ///
    /// The active chain is captured under the lock and run outside it, so a
    /// reload can swap chains while this call is in progress.
    pub fn handle(&self, frame: &Frame<'_>, cancel: &CancellationToken) -> Result<ChainOutcome> {
        let chain = self.shared.current().ok_or_else(|| Error::PluginDisposed {
            path: self.shared.path.clone(),
        })?;
        let outcome = chain.lock().handle(frame, cancel);
        outcome
    }

    /// Stop watching the module file and release the active chain
    ///
    /// The chain is disposed once no dispatch is using it. Later calls to
    /// [`handle`](Self::handle) fail with [`Error::PluginDisposed`].
    pub fn dispose(&self) {
        if let Some(poller) = self.poller.lock().take() {
            // The poller also stops if the sender is dropped.
            let _ = poller.stop.send(());
            if poller.thread.join().is_err() {
                error!(path = %self.shared.path.display(), "Plugin reload thread panicked");
            }
        }

        let active = self.shared.active.lock().take();
        if active.is_some() {
            debug!(path = %self.shared.path.display(), "Releasing analyzer chain");
        }
        drop(active);
    }

    /// Module path
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Number of successful loads so far; starts at 1
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    /// Analyzer type ids of the active chain
    pub fn analyzer_names(&self) -> Vec<String> {
        self.shared
            .current()
            .map(|chain| {
                chain
                    .lock()
                    .analyzer_names()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Drop for HotReloadChain {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn spawn_poller(
    shared: Arc<Shared>,
    interval: Duration,
    mut last_modified: Option<SystemTime>,
) -> Result<Poller> {
    let (stop, stopped) = bounded::<()>(1);
    let thread = std::thread::Builder::new()
        .name("plugin-reload".to_string())
        .spawn(move || {
            debug!(path = %shared.path.display(), ?interval, "Watching plugin module");
            loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => shared.poll(&mut last_modified),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!(path = %shared.path.display(), "Stopped watching plugin module");
        })?;

    Ok(Poller { stop, thread })
}

fn modified_time(path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}

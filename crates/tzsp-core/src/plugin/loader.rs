//! Plugin module loading
//!
//! [`DylibLoader`] opens real dynamic libraries; [`StaticLoader`] serves
//! descriptors linked into the host binary.

use libloading::Library;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;
use tzsp_analyzer_api::{PluginDescriptor, DESCRIPTOR_SYMBOL};

use crate::error::{Error, Result};

/// A loaded plugin module
///
/// Dropping the module unloads it. Everything created from its descriptor
/// must be dropped first.
pub trait PluginModule: Send {
    /// The module's exported descriptor
    fn descriptor(&self) -> &PluginDescriptor;

    /// Route the module's log output to `dispatch`
    fn attach_logger(&self, _dispatch: tracing::Dispatch) {}
}

/// Opens plugin modules
pub trait ModuleLoader: Send + Sync {
    /// Load the module at `path` into a fresh, independently unloadable context
    fn load(&self, path: &Path) -> Result<Box<dyn PluginModule>>;
}

/// Loads `cdylib` plugin modules with `libloading`
///
/// Each load copies the module, and the dynamic libraries next to it, into a
/// private temporary directory and opens the copy. The platform loader would
/// otherwise hand back the already-mapped image for a path it has seen.
#[derive(Debug, Clone)]
pub struct DylibLoader {
    copy_siblings: bool,
}

impl DylibLoader {
    /// Create a loader that also copies same-directory dependency modules
    pub fn new() -> Self {
        Self {
            copy_siblings: true,
        }
    }

    /// Only copy the module itself
    pub fn without_siblings(mut self) -> Self {
        self.copy_siblings = false;
        self
    }
}

impl Default for DylibLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for DylibLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn PluginModule>> {
        if !path.is_file() {
            return Err(Error::PluginNotFound {
                path: path.to_path_buf(),
            });
        }

        let (shadow, copy) = shadow_copy(path, self.copy_siblings)?;
        debug!(path = %path.display(), copy = %copy.display(), "Opening plugin module");

        // SAFETY: running a module's initialisers is inherent to loading a
        // plugin; the caller chose to trust the module at `path`.
        let library = unsafe { Library::new(&copy) }
            .map_err(|e| Error::plugin_load(path, e.to_string()))?;

        // SAFETY: the symbol is declared by `export_analyzers!` as a
        // `PluginDescriptor` static; the API version check that follows
        // rejects modules built against a different layout.
        let descriptor = unsafe { library.get::<*const PluginDescriptor>(DESCRIPTOR_SYMBOL) }
            .map(|symbol| *symbol)
            .map_err(|e| {
                Error::invalid_manifest(path, format!("no plugin descriptor exported: {e}"))
            })?;

        if descriptor.is_null() {
            return Err(Error::invalid_manifest(path, "plugin descriptor is null"));
        }

        Ok(Box::new(DylibModule {
            descriptor,
            _library: library,
            _shadow: shadow,
        }))
    }
}

/// Copy `path` (and optionally its same-extension siblings) into a new temp dir
fn shadow_copy(path: &Path, copy_siblings: bool) -> Result<(TempDir, PathBuf)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::plugin_load(path, "path has no file name"))?;
    let shadow = tempfile::Builder::new().prefix("tzsp-plugin-").tempdir()?;

    if copy_siblings {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            for entry in std::fs::read_dir(dir)? {
                let sibling = entry?.path();
                if sibling.is_file()
                    && sibling.file_name() != Some(file_name)
                    && is_dynamic_library(&sibling)
                {
                    if let Some(name) = sibling.file_name() {
                        std::fs::copy(&sibling, shadow.path().join(name))?;
                    }
                }
            }
        }
    }

    let copy = shadow.path().join(file_name);
    std::fs::copy(path, &copy)?;
    Ok((shadow, copy))
}

fn is_dynamic_library(path: &Path) -> bool {
    path.extension() == Some(OsStr::new(std::env::consts::DLL_EXTENSION))
}

struct DylibModule {
    descriptor: *const PluginDescriptor,
    // Declared before `_shadow` so the library is closed before its file is removed.
    _library: Library,
    _shadow: TempDir,
}

// SAFETY: the descriptor is an immutable static inside `library`, which the
// module owns; nothing else aliases it mutably.
unsafe impl Send for DylibModule {}

impl PluginModule for DylibModule {
    fn descriptor(&self) -> &PluginDescriptor {
        // SAFETY: non-null (checked at load) and valid while the library is open,
        // which is at least as long as `&self`.
        unsafe { &*self.descriptor }
    }

    fn attach_logger(&self, dispatch: tracing::Dispatch) {
        if let Some(attach) = self.descriptor().attach_logger {
            attach(dispatch);
        }
    }
}

/// Serves descriptors compiled into the host, keyed by path
///
/// Statically linked modules share the host's logging globals, so they are
/// never asked to attach a logger.
#[derive(Default)]
pub struct StaticLoader {
    modules: HashMap<PathBuf, &'static PluginDescriptor>,
}

impl StaticLoader {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `descriptor` for loads of `path`
    pub fn register(&mut self, path: impl Into<PathBuf>, descriptor: &'static PluginDescriptor) {
        self.modules.insert(path.into(), descriptor);
    }
}

impl ModuleLoader for StaticLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn PluginModule>> {
        let descriptor = self
            .modules
            .get(path)
            .copied()
            .ok_or_else(|| Error::PluginNotFound {
                path: path.to_path_buf(),
            })?;
        Ok(Box::new(StaticModule(descriptor)))
    }
}

struct StaticModule(&'static PluginDescriptor);

impl PluginModule for StaticModule {
    fn descriptor(&self) -> &PluginDescriptor {
        self.0
    }
}

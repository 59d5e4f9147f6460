//! Plugin module descriptor
//!
//! A plugin module exports a single [`PluginDescriptor`] under
//! [`DESCRIPTOR_SYMBOL`]. The host resolves it once at load time into a
//! factory table; there is no runtime type discovery.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::analyzer::{AnalysisContext, Analyzer, AnalyzerError, CancellationToken, ChainResult};
use crate::frame::Frame;

/// Name of this API crate
pub const API_NAME: &str = env!("CARGO_PKG_NAME");

/// Version of this API crate
pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exported symbol holding a module's [`PluginDescriptor`]
pub const DESCRIPTOR_SYMBOL: &[u8] = b"TZSP_PLUGIN_DESCRIPTOR\0";

/// Compiler that built this crate, as reported by `rustc --version`
pub const RUSTC_VERSION: &str = env!("TZSP_RUSTC_VERSION");

/// Identity of the analyzer API a module was compiled against
///
/// Includes the compiler version: the types shared with a module have no
/// stable layout across compiler builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiReference {
    /// API crate name
    pub name: &'static str,
    /// API crate version
    pub version: &'static str,
    /// Compiler version
    pub rustc: &'static str,
}

impl ApiReference {
    /// The API this code was compiled against
    pub const CURRENT: Self = Self {
        name: API_NAME,
        version: API_VERSION,
        rustc: RUSTC_VERSION,
    };
}

impl fmt::Display for ApiReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.version, self.rustc)
    }
}

/// Constructor of one analyzer type
pub type CreateFn = fn() -> Result<Box<dyn Analyzer>, AnalyzerError>;

/// Factory table entry
#[derive(Clone, Copy)]
pub struct AnalyzerFactory {
    /// Identifier the manifest refers to
    pub type_id: &'static str,
    /// Constructor
    pub create: CreateFn,
}

impl AnalyzerFactory {
    /// Create a factory entry
    pub const fn new(type_id: &'static str, create: CreateFn) -> Self {
        Self { type_id, create }
    }
}

impl fmt::Debug for AnalyzerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyzerFactory")
            .field("type_id", &self.type_id)
            .finish_non_exhaustive()
    }
}

/// Everything the host needs to build a chain from a module
///
/// Modules with fallible constructors can declare this static by hand
/// instead of going through [`export_analyzers!`](crate::export_analyzers).
#[derive(Debug)]
pub struct PluginDescriptor {
    /// API the module was compiled against
    pub api: ApiReference,
    /// Analyzer type ids in chain order
    pub manifest: &'static [&'static str],
    /// Constructors for the ids in `manifest`
    pub factories: &'static [AnalyzerFactory],
    /// Installs the host's log dispatcher inside the module
    pub attach_logger: Option<fn(tracing::Dispatch)>,
}

impl PluginDescriptor {
    /// Look up the factory for a manifest entry
    pub fn factory(&self, type_id: &str) -> Option<&AnalyzerFactory> {
        self.factories.iter().find(|f| f.type_id == type_id)
    }
}

/// Factory for any `Default` analyzer
///
/// The analyzer is wrapped in [`Guarded`], and a panicking constructor is
/// reported as an [`AnalyzerError`].
pub fn default_factory<T: Analyzer + Default + 'static>() -> Result<Box<dyn Analyzer>, AnalyzerError>
{
    let analyzer = panic::catch_unwind(T::default)
        .map_err(|payload| AnalyzerError::new(panic_message(payload.as_ref())))?;
    Ok(Box::new(Guarded(analyzer)))
}

/// Catches panics of the wrapped analyzer and reports them as errors
///
/// The catching has to happen in the module that panicked: a `cdylib` has its
/// own copy of the panic runtime, and an unwind reaching the host aborts the
/// process.
#[derive(Debug, Default)]
pub struct Guarded<T>(pub T);

impl<T: Analyzer> Analyzer for Guarded<T> {
    fn handle(
        &mut self,
        frame: &Frame<'_>,
        context: Option<&AnalysisContext>,
        cancel: &CancellationToken,
    ) -> Result<ChainResult, AnalyzerError> {
        let inner = &mut self.0;
        panic::catch_unwind(AssertUnwindSafe(|| inner.handle(frame, context, cancel)))
            .unwrap_or_else(|payload| Err(AnalyzerError::new(panic_message(payload.as_ref()))))
    }

    fn dispose(&mut self) -> Result<(), AnalyzerError> {
        let inner = &mut self.0;
        panic::catch_unwind(AssertUnwindSafe(|| inner.dispose()))
            .unwrap_or_else(|payload| Err(AnalyzerError::new(panic_message(payload.as_ref()))))
    }
}

/// Describe a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Route this module's `tracing` output to the host's dispatcher
///
/// A module linked as a `cdylib` carries its own copy of the `tracing`
/// globals, so without this its events would go nowhere.
pub fn attach_logger(dispatch: tracing::Dispatch) {
    // Already set when the host attaches twice to the same module instance.
    let _ = tracing::dispatcher::set_global_default(dispatch);
    // Callsites registered before the dispatcher was installed cached
    // "never" interest; recompute them against the host's subscriber.
    tracing::callsite::rebuild_interest_cache();
}

/// Export the plugin descriptor for the listed analyzer types
///
/// Chain order is argument order. Each type must implement `Analyzer` and
/// `Default`, and is wrapped in [`Guarded`](crate::Guarded) when created.
#[macro_export]
macro_rules! export_analyzers {
    ($($analyzer:ty),+ $(,)?) => {
        #[no_mangle]
        pub static TZSP_PLUGIN_DESCRIPTOR: $crate::PluginDescriptor = $crate::PluginDescriptor {
            api: $crate::ApiReference::CURRENT,
            manifest: &[$(stringify!($analyzer)),+],
            factories: &[$(
                $crate::AnalyzerFactory::new(
                    stringify!($analyzer),
                    $crate::default_factory::<$analyzer>,
                )
            ),+],
            attach_logger: ::core::option::Option::Some($crate::attach_logger),
        };
    };
}

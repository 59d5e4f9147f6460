//! Analyzer trait and chain flow control

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::frame::Frame;

/// Opaque value handed from one analyzer to the next within a single dispatch
///
/// A context never outlives the dispatch that produced it and is never
/// passed to another plugin module.
pub struct AnalysisContext(Box<dyn Any + Send>);

impl AnalysisContext {
    /// Wrap a value
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Borrow the value if it is a `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Check whether the value is a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for AnalysisContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AnalysisContext(..)")
    }
}

/// Decision returned by an analyzer for the current frame
#[derive(Debug)]
pub enum ChainResult {
    /// Run the next analyzer with the context unchanged
    Continue,
    /// Run the next analyzer with a replaced context
    ContinueWithNewContext(AnalysisContext),
    /// End the chain for this frame; later analyzers do not run
    Stop,
}

impl ChainResult {
    /// Shorthand for `ContinueWithNewContext(AnalysisContext::new(value))`
    pub fn with_context<T: Any + Send>(value: T) -> Self {
        Self::ContinueWithNewContext(AnalysisContext::new(value))
    }

    /// Whether the chain keeps running after this result
    pub fn is_continue(&self) -> bool {
        !matches!(self, Self::Stop)
    }
}

/// Error raised by an analyzer
#[derive(Error, Debug)]
#[error("{message}")]
pub struct AnalyzerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl AnalyzerError {
    /// Create an error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping an underlying cause
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Error message without the cause
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Cooperative cancellation flag
///
/// Cancellation is advisory: analyzers may check it between units of work,
/// the host never interrupts a running analyzer.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; visible to every clone of this token
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A pluggable stage of the analyzer chain
///
/// The host guarantees that calls into one analyzer instance are never
/// concurrent or reentrant.
pub trait Analyzer: Send {
    /// Handle one frame
    fn handle(
        &mut self,
        frame: &Frame<'_>,
        context: Option<&AnalysisContext>,
        cancel: &CancellationToken,
    ) -> Result<ChainResult, AnalyzerError>;

    /// Release resources held by the analyzer
    ///
    /// Called once, before the owning plugin module is unloaded.
    fn dispose(&mut self) -> Result<(), AnalyzerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_context_downcast() {
        let ctx = AnalysisContext::new(42u32);
        assert!(ctx.is::<u32>());
        assert_eq!(ctx.downcast_ref::<u32>(), Some(&42));
        assert!(ctx.downcast_ref::<String>().is_none());
    }

    #[test]
    fn test_chain_result_is_continue() {
        assert!(ChainResult::Continue.is_continue());
        assert!(ChainResult::with_context("flow").is_continue());
        assert!(!ChainResult::Stop.is_continue());
    }

    #[test]
    fn test_cancellation_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_analyzer_error_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = AnalyzerError::with_source("cannot open capture log", io);
        assert_eq!(err.to_string(), "cannot open capture log");
        assert!(err.source().unwrap().to_string().contains("disk gone"));

        let err = AnalyzerError::new("plain");
        assert!(err.source().is_none());
        assert_eq!(err.message(), "plain");
    }
}

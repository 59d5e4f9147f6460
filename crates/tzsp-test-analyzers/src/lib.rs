//! Analyzer module for the host's dynamic loading tests
//!
//! [`Tripwire`] reacts to the first payload byte:
//!
//! | byte | result |
//! |---|---|
//! | `0xDD` | panics |
//! | `0xEE` | returns an error |
//! | `0xFF` | stops the chain |
//! | other | continues |

use tracing::info;
use tzsp_analyzer_api::{
    export_analyzers, AnalysisContext, Analyzer, AnalyzerError, CancellationToken, ChainResult,
    Frame,
};

/// Payload byte that makes [`Tripwire`] panic
pub const PANIC_BYTE: u8 = 0xDD;
/// Payload byte that makes [`Tripwire`] return an error
pub const ERROR_BYTE: u8 = 0xEE;
/// Payload byte that makes [`Tripwire`] stop the chain
pub const STOP_BYTE: u8 = 0xFF;

/// Logs every frame and misbehaves on request
#[derive(Debug, Default)]
pub struct Tripwire {
    seen: u64,
}

impl Analyzer for Tripwire {
    fn handle(
        &mut self,
        frame: &Frame<'_>,
        _context: Option<&AnalysisContext>,
        _cancel: &CancellationToken,
    ) -> Result<ChainResult, AnalyzerError> {
        self.seen += 1;
        info!(counter = frame.counter, seen = self.seen, "Tripwire saw frame");
        match frame.payload.first() {
            Some(&PANIC_BYTE) => panic!("tripwire hit on frame {}", frame.counter),
            Some(&ERROR_BYTE) => Err(AnalyzerError::new("tripwire error")),
            Some(&STOP_BYTE) => Ok(ChainResult::Stop),
            _ => Ok(ChainResult::Continue),
        }
    }
}

export_analyzers!(Tripwire);

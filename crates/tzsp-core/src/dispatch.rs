//! Packet dispatch strategies
//!
//! A [`Dispatcher`] takes raw datagrams from the listener and gets them
//! decoded and analyzed, either on the calling thread ([`InlineDispatcher`])
//! or on a dedicated worker fed through a [`RingBuffer`]
//! ([`QueuedDispatcher`]).

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::SystemTime;
use tracing::{debug, error, info, trace, warn};
use tzsp_analyzer_api::{CancellationToken, Frame};

use crate::buffer::RingBuffer;
use crate::config::{DispatchConfig, DispatchMode};
use crate::error::{Error, Result};
use crate::plugin::{ChainHandler, ChainOutcome};
use crate::tzsp;

/// One received datagram, copied out of the socket buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDatagram {
    /// Arrival counter, monotonically increasing from 0
    pub counter: u64,
    /// Arrival time
    pub arrival: SystemTime,
    /// Datagram bytes
    pub bytes: Vec<u8>,
}

impl RawDatagram {
    /// Create a datagram stamped with the current time
    pub fn new(counter: u64, bytes: Vec<u8>) -> Self {
        Self {
            counter,
            arrival: SystemTime::now(),
            bytes,
        }
    }
}

/// What happened to a dispatched datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Every analyzer ran
    Continued,
    /// An analyzer stopped the chain
    Dropped,
    /// Handed to the worker thread
    Queued,
}

impl From<ChainOutcome> for Disposition {
    fn from(outcome: ChainOutcome) -> Self {
        match outcome {
            ChainOutcome::Continued => Self::Continued,
            ChainOutcome::Dropped => Self::Dropped,
        }
    }
}

/// Dispatch strategy
pub trait Dispatcher: Send + Sync {
    /// Strategy name for logs
    fn name(&self) -> &'static str;

    /// Accept one datagram
    ///
    /// Errors concern this datagram only.
    fn dispatch(&self, datagram: RawDatagram, cancel: &CancellationToken) -> Result<Disposition>;

    /// Stop background work; datagrams not yet processed are discarded
    fn shutdown(&self) {}
}

/// Build the dispatcher selected by `config`
pub fn from_config(
    config: &DispatchConfig,
    handler: Arc<dyn ChainHandler>,
) -> Result<Box<dyn Dispatcher>> {
    Ok(match config.mode {
        DispatchMode::Inline => Box::new(InlineDispatcher::new(handler)),
        DispatchMode::Queued => Box::new(QueuedDispatcher::new(handler, config.queue_size)?),
    })
}

/// Decode a datagram and run the analyzers over it
pub fn process_datagram(
    handler: &dyn ChainHandler,
    datagram: &RawDatagram,
    cancel: &CancellationToken,
) -> Result<Disposition> {
    let result = tzsp::decode_frame(&datagram.bytes)
        .map_err(Error::from)
        .and_then(|(link_layer, payload)| {
            let frame = Frame {
                counter: datagram.counter,
                arrival: datagram.arrival,
                link_layer,
                payload,
            };
            trace!(
                counter = frame.counter,
                link_layer = %frame.link_layer,
                len = payload.len(),
                "Dispatching frame"
            );
            handler.handle(&frame, cancel)
        });

    match result {
        Ok(outcome) => Ok(outcome.into()),
        Err(e) => {
            debug!(
                counter = datagram.counter,
                bytes = %hex::encode(&datagram.bytes),
                "Datagram failed"
            );
            Err(e)
        }
    }
}

/// Decodes and analyzes on the receive thread
pub struct InlineDispatcher {
    handler: Arc<dyn ChainHandler>,
}

impl InlineDispatcher {
    /// Create an inline dispatcher
    pub fn new(handler: Arc<dyn ChainHandler>) -> Self {
        Self { handler }
    }
}

impl Dispatcher for InlineDispatcher {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn dispatch(&self, datagram: RawDatagram, cancel: &CancellationToken) -> Result<Disposition> {
        process_datagram(self.handler.as_ref(), &datagram, cancel)
    }
}

#[derive(Default)]
struct Signal {
    wake: bool,
    stop: bool,
}

struct Queue {
    buffer: RingBuffer<RawDatagram>,
    signal: Mutex<Signal>,
    condvar: Condvar,
    handler: Arc<dyn ChainHandler>,
    cancel: CancellationToken,
}

impl Queue {
    fn run(&self) {
        loop {
            {
                let mut signal = self.signal.lock();
                while !signal.wake && !signal.stop {
                    self.condvar.wait(&mut signal);
                }
                if signal.stop {
                    break;
                }
                signal.wake = false;
            }

            while let Some(datagram) = self.buffer.dequeue() {
                if self.cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = process_datagram(self.handler.as_ref(), &datagram, &self.cancel) {
                    warn!(counter = datagram.counter, error = %e, "Dropped datagram");
                }
            }
        }
    }
}

/// Buffers datagrams for a single worker thread
///
/// The receive thread only copies datagrams into the ring buffer. When the
/// worker falls behind, the oldest unprocessed datagrams are overwritten.
pub struct QueuedDispatcher {
    queue: Arc<Queue>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueuedDispatcher {
    /// Create the dispatcher and start its worker thread
    pub fn new(handler: Arc<dyn ChainHandler>, capacity: usize) -> Result<Self> {
        let queue = Arc::new(Queue {
            buffer: RingBuffer::new(capacity)?,
            signal: Mutex::new(Signal::default()),
            condvar: Condvar::new(),
            handler,
            cancel: CancellationToken::new(),
        });

        let worker_queue = Arc::clone(&queue);
        let worker = std::thread::Builder::new()
            .name("packet-worker".to_string())
            .spawn(move || worker_queue.run())?;

        info!(capacity, "Queued dispatcher started");
        Ok(Self {
            queue,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Datagrams overwritten before the worker reached them
    pub fn dropped(&self) -> u64 {
        self.queue.buffer.dropped()
    }

    /// Datagrams waiting for the worker
    pub fn pending(&self) -> usize {
        self.queue.buffer.len()
    }
}

impl Dispatcher for QueuedDispatcher {
    fn name(&self) -> &'static str {
        "queued"
    }

    fn dispatch(&self, datagram: RawDatagram, _cancel: &CancellationToken) -> Result<Disposition> {
        self.queue.buffer.enqueue(datagram);
        self.queue.signal.lock().wake = true;
        self.queue.condvar.notify_one();
        Ok(Disposition::Queued)
    }

    fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        self.queue.cancel.cancel();
        self.queue.signal.lock().stop = true;
        self.queue.condvar.notify_one();
        if worker.join().is_err() {
            error!("Packet worker thread panicked");
        }

        let discarded = std::iter::from_fn(|| self.queue.buffer.dequeue()).count();
        info!(
            discarded,
            overwritten = self.dropped(),
            "Queued dispatcher stopped"
        );
    }
}

impl Drop for QueuedDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

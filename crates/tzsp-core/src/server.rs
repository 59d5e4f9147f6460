//! UDP listener
//!
//! [`Listener`] owns the socket and its receive thread. [`Server`] wires a
//! listener to a dispatcher and an [`AnalyzerHost`] and shuts them down in
//! order: socket first, then the dispatch worker, then the plugins.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};
use tzsp_analyzer_api::CancellationToken;

use crate::config::{Config, ServerConfig};
use crate::dispatch::{self, Dispatcher, RawDatagram};
use crate::error::{Error, Result};
use crate::plugin::{AnalyzerHost, ModuleLoader};

/// A bound UDP socket that has not started receiving yet
#[derive(Debug)]
pub struct Listener {
    socket: UdpSocket,
    local_addr: SocketAddr,
    buffer_size: usize,
}

impl Listener {
    /// Create and bind the socket described by `config`
    #[instrument(skip_all, fields(address = %config.listen_address, port = config.port))]
    pub fn bind(config: &ServerConfig) -> Result<Self> {
        let endpoint = config.endpoint();

        let socket = Socket::new(Domain::for_address(endpoint), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| Error::socket("create", e))?;
        socket
            .set_recv_buffer_size(config.buffer_size)
            .map_err(|e| Error::socket("set receive buffer size", e))?;
        socket
            .set_read_timeout(Some(config.timeout()))
            .map_err(|e| Error::socket("set receive timeout", e))?;
        socket
            .bind(&endpoint.into())
            .map_err(|e| Error::socket("bind", e))?;

        let socket: UdpSocket = socket.into();
        let local_addr = socket
            .local_addr()
            .map_err(|e| Error::socket("local address", e))?;

        info!(%local_addr, "Listening for TZSP datagrams");
        Ok(Self {
            socket,
            local_addr,
            buffer_size: config.buffer_size,
        })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the receive thread, handing every datagram to `dispatcher`
    pub fn start(self, dispatcher: Arc<dyn Dispatcher>) -> Result<ListenerHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let local_addr = self.local_addr;

        let thread = {
            let stop = Arc::clone(&stop);
            let cancel = cancel.clone();
            std::thread::Builder::new()
                .name("tzsp-receive".to_string())
                .spawn(move || self.receive_loop(dispatcher.as_ref(), &stop, &cancel))?
        };

        Ok(ListenerHandle {
            stop,
            cancel,
            thread: Some(thread),
            local_addr,
        })
    }

    fn receive_loop(self, dispatcher: &dyn Dispatcher, stop: &AtomicBool, cancel: &CancellationToken) {
        debug!(dispatcher = dispatcher.name(), "Receive loop started");
        let mut buffer = vec![0u8; self.buffer_size];
        let mut counter: u64 = 0;

        while !stop.load(Ordering::Acquire) {
            let len = match self.socket.recv_from(&mut buffer) {
                Ok((0, _)) => continue,
                Ok((len, peer)) => {
                    trace!(%peer, len, counter, "Received datagram");
                    len
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    warn!(error = %e, "Receive failed");
                    continue;
                }
            };

            let datagram = RawDatagram::new(counter, buffer[..len].to_vec());
            counter += 1;

            if let Err(e) = dispatcher.dispatch(datagram, cancel) {
                if e.is_per_datagram() {
                    warn!(counter = counter - 1, error = %e, "Dropped datagram");
                } else {
                    error!(counter = counter - 1, error = %e, "Dispatch failed");
                }
            }
        }

        info!(received = counter, "Receive loop stopped");
        // The socket closes as `self` drops here.
    }
}

/// Running receive thread
pub struct ListenerHandle {
    stop: Arc<AtomicBool>,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl ListenerHandle {
    /// Address the socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop receiving and close the socket
    ///
    /// Waits up to one receive timeout for the thread to notice.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        self.cancel.cancel();
        if thread.join().is_err() {
            error!("Receive thread panicked");
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Listener, dispatcher and analyzer host running together
pub struct Server {
    listener: ListenerHandle,
    dispatcher: Arc<dyn Dispatcher>,
    host: Arc<AnalyzerHost>,
}

impl Server {
    /// Load the plugins, bind the socket and start receiving
    ///
    /// Fails if any plugin module cannot be loaded or the socket cannot be bound.
    pub fn start(config: &Config, loader: Arc<dyn ModuleLoader>) -> Result<Self> {
        let host = Arc::new(AnalyzerHost::load(&config.plugins, loader)?);
        let dispatcher: Arc<dyn Dispatcher> =
            Arc::from(dispatch::from_config(&config.dispatch, host.clone())?);

        let listener = match Listener::bind(&config.server) {
            Ok(listener) => listener,
            Err(e) => {
                dispatcher.shutdown();
                host.dispose();
                return Err(e);
            }
        };
        let listener = listener.start(Arc::clone(&dispatcher))?;

        info!(
            address = %listener.local_addr(),
            dispatch = dispatcher.name(),
            modules = host.len(),
            "Server started"
        );
        Ok(Self {
            listener,
            dispatcher,
            host,
        })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// The analyzer host
    pub fn host(&self) -> &AnalyzerHost {
        &self.host
    }

    /// Stop the listener, then the dispatcher, then dispose the plugins
    pub fn shutdown(&mut self) {
        self.listener.shutdown();
        self.dispatcher.shutdown();
        self.host.dispose();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

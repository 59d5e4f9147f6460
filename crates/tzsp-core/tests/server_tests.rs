//! End-to-end tests over loopback UDP

use parking_lot::Mutex;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tzsp_core::api::{
    default_factory, AnalysisContext, Analyzer, AnalyzerError, AnalyzerFactory, ApiReference,
    CancellationToken, ChainResult, Frame, LinkLayer, PluginDescriptor,
};
use tzsp_core::config::{Config, DispatchMode};
use tzsp_core::{Server, StaticLoader};

/// Frames seen by each server, keyed by the first payload byte
static SEEN: Mutex<Vec<(u8, u64, LinkLayer, Vec<u8>)>> = parking_lot::const_mutex(Vec::new());
static DISPOSED: Mutex<Vec<u8>> = parking_lot::const_mutex(Vec::new());

#[derive(Default)]
struct Capture {
    server: Option<u8>,
}

impl Analyzer for Capture {
    fn handle(
        &mut self,
        frame: &Frame<'_>,
        _context: Option<&AnalysisContext>,
        _cancel: &CancellationToken,
    ) -> Result<ChainResult, AnalyzerError> {
        let Some(&server) = frame.payload.first() else {
            return Ok(ChainResult::Stop);
        };
        self.server = Some(server);
        SEEN.lock()
            .push((server, frame.counter, frame.link_layer, frame.payload.to_vec()));
        Ok(ChainResult::Continue)
    }

    fn dispose(&mut self) -> Result<(), AnalyzerError> {
        if let Some(server) = self.server {
            DISPOSED.lock().push(server);
        }
        Ok(())
    }
}

static CAPTURE: PluginDescriptor = PluginDescriptor {
    api: ApiReference::CURRENT,
    manifest: &["Capture"],
    factories: &[AnalyzerFactory::new("Capture", default_factory::<Capture>)],
    attach_logger: None,
};

fn seen_by(server: u8) -> Vec<(u64, LinkLayer, Vec<u8>)> {
    SEEN.lock()
        .iter()
        .filter(|s| s.0 == server)
        .map(|s| (s.1, s.2, s.3.clone()))
        .collect()
}

fn start(mode: DispatchMode) -> Server {
    let mut loader = StaticLoader::new();
    loader.register("capture", &CAPTURE);

    let mut config = Config::default();
    config.server.listen_address = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.timeout_ms = 50;
    config.dispatch.mode = mode;
    config.dispatch.queue_size = 1024;
    config.plugins.paths = vec!["capture".into()];
    config.plugins.hot_reload = false;

    Server::start(&config, Arc::new(loader)).unwrap()
}

fn run_exchange(mode: DispatchMode, id: u8) {
    let mut server = start(mode);
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let target = server.local_addr();

    // Ethernet frame, with a padding byte and one tagged field
    sender
        .send_to(&[0x01, 0x00, 0x00, 0x01, 0x00, 0x0A, 0x01, 0x7F, 0x01, id, 0xAA], target)
        .unwrap();
    // Malformed: wrong version
    sender.send_to(&[0x02, 0x00, 0x00, 0x01, 0x01, id], target).unwrap();
    // IEEE 802.11 frame
    sender
        .send_to(&[0x01, 0x00, 0x00, 0x12, 0x01, id, 0xBB], target)
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while seen_by(id).len() < 2 {
        assert!(Instant::now() < deadline, "datagrams not analyzed");
        std::thread::sleep(Duration::from_millis(5));
    }
    server.shutdown();

    assert_eq!(
        seen_by(id),
        vec![
            (0, LinkLayer::Ethernet, vec![id, 0xAA]),
            (2, LinkLayer::Ieee802, vec![id, 0xBB]),
        ]
    );
    assert!(DISPOSED.lock().contains(&id));
}

#[test]
fn test_inline_end_to_end() {
    run_exchange(DispatchMode::Inline, 1);
}

#[test]
fn test_queued_end_to_end() {
    run_exchange(DispatchMode::Queued, 2);
}

#[test]
fn test_shutdown_closes_socket() {
    let mut server = start(DispatchMode::Inline);
    let address = server.local_addr();
    server.shutdown();
    server.shutdown();

    // The port is free again once the listener is gone.
    UdpSocket::bind(address).unwrap();
}

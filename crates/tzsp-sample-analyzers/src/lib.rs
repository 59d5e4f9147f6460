//! Sample analyzer plugin module
//!
//! Build as a `cdylib` and pass the library to `tzsp-server -a`. The chain:
//!
//! 1. [`FrameLogger`] logs every frame at debug level
//! 2. [`TcpFlows`] and [`UdpFlows`] tag TCP and UDP frames with a [`FlowKey`]
//! 3. [`FlowCounter`] counts frames per flow and stops untagged frames

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tzsp_analyzer_api::{
    export_analyzers, AnalysisContext, Analyzer, AnalyzerError, CancellationToken, ChainResult,
    Filtered, Frame, LayerAnalyzer, Layers, TransportKind,
};

const PREVIEW_LEN: usize = 32;

/// Logs each frame with a hex preview of its first bytes
#[derive(Debug, Default)]
pub struct FrameLogger;

impl Analyzer for FrameLogger {
    fn handle(
        &mut self,
        frame: &Frame<'_>,
        _context: Option<&AnalysisContext>,
        _cancel: &CancellationToken,
    ) -> Result<ChainResult, AnalyzerError> {
        let preview = &frame.payload[..frame.payload.len().min(PREVIEW_LEN)];
        debug!(
            counter = frame.counter,
            link_layer = %frame.link_layer,
            len = frame.payload.len(),
            preview = %hex::encode(preview),
            "Frame"
        );
        Ok(ChainResult::Continue)
    }
}

/// Transport-level identity of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    /// TCP or UDP
    pub transport: TransportKind,
    /// Source address and port
    pub source: (IpAddr, u16),
    /// Destination address and port
    pub destination: (IpAddr, u16),
}

impl FlowKey {
    fn from_layers(transport: TransportKind, layers: &Layers<'_>) -> Option<Self> {
        let (src, dst) = layers.addresses()?;
        let (src_port, dst_port) = layers.ports()?;
        Some(Self {
            transport,
            source: (src, src_port),
            destination: (dst, dst_port),
        })
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.transport {
            TransportKind::Tcp => "tcp",
            TransportKind::Udp => "udp",
        };
        write!(
            f,
            "{proto} {}:{} -> {}:{}",
            self.source.0, self.source.1, self.destination.0, self.destination.1
        )
    }
}

fn tag(transport: TransportKind, layers: &Layers<'_>) -> ChainResult {
    match FlowKey::from_layers(transport, layers) {
        Some(key) => ChainResult::with_context(key),
        None => ChainResult::Continue,
    }
}

/// Tags TCP frames with their [`FlowKey`]
#[derive(Debug, Default)]
pub struct TcpFlowTagger;

impl LayerAnalyzer for TcpFlowTagger {
    const TRANSPORT: TransportKind = TransportKind::Tcp;

    fn handle_layers(
        &mut self,
        _frame: &Frame<'_>,
        layers: &Layers<'_>,
        _context: Option<&AnalysisContext>,
        _cancel: &CancellationToken,
    ) -> Result<ChainResult, AnalyzerError> {
        Ok(tag(Self::TRANSPORT, layers))
    }
}

/// Tags UDP frames with their [`FlowKey`]
#[derive(Debug, Default)]
pub struct UdpFlowTagger;

impl LayerAnalyzer for UdpFlowTagger {
    const TRANSPORT: TransportKind = TransportKind::Udp;

    fn handle_layers(
        &mut self,
        _frame: &Frame<'_>,
        layers: &Layers<'_>,
        _context: Option<&AnalysisContext>,
        _cancel: &CancellationToken,
    ) -> Result<ChainResult, AnalyzerError> {
        Ok(tag(Self::TRANSPORT, layers))
    }
}

/// TCP flow tagger for the chain
pub type TcpFlows = Filtered<TcpFlowTagger>;

/// UDP flow tagger for the chain
pub type UdpFlows = Filtered<UdpFlowTagger>;

/// Flows tracked by default before the least recently seen is evicted
pub const DEFAULT_MAX_FLOWS: usize = 65_536;

/// Default time after which a flow with no new frames is forgotten
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct FlowEntry {
    frames: u64,
    last_seen: Instant,
}

/// Counts frames per flow; frames without a flow go no further
///
/// At most `max_flows` flows are tracked. When a new flow arrives at the
/// limit, idle flows are dropped first, then the least recently seen one.
#[derive(Debug)]
pub struct FlowCounter {
    flows: HashMap<FlowKey, FlowEntry>,
    max_flows: usize,
    idle_timeout: Duration,
}

impl Default for FlowCounter {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_FLOWS, DEFAULT_IDLE_TIMEOUT)
    }
}

impl FlowCounter {
    /// Create with a custom flow limit and idle timeout
    pub fn with_limits(max_flows: usize, idle_timeout: Duration) -> Self {
        Self {
            flows: HashMap::new(),
            max_flows: max_flows.max(1),
            idle_timeout,
        }
    }

    /// Frames seen for `key`
    pub fn count(&self, key: &FlowKey) -> u64 {
        self.flows.get(key).map_or(0, |entry| entry.frames)
    }

    /// Number of tracked flows
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Check whether no flows are tracked
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Forget flows idle for longer than the timeout
    pub fn cleanup(&mut self) {
        let now = Instant::now();
        let timeout = self.idle_timeout;
        self.flows
            .retain(|_, entry| now.duration_since(entry.last_seen) < timeout);
    }

    fn make_room(&mut self) {
        self.cleanup();
        if self.flows.len() < self.max_flows {
            return;
        }
        let oldest = self
            .flows
            .iter()
            .min_by_key(|(_, entry)| entry.last_seen)
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            if let Some(entry) = self.flows.remove(&key) {
                debug!(flow = %key, frames = entry.frames, "Evicted flow");
            }
        }
    }
}

impl Analyzer for FlowCounter {
    fn handle(
        &mut self,
        frame: &Frame<'_>,
        context: Option<&AnalysisContext>,
        _cancel: &CancellationToken,
    ) -> Result<ChainResult, AnalyzerError> {
        let Some(key) = context.and_then(|c| c.downcast_ref::<FlowKey>()) else {
            return Ok(ChainResult::Stop);
        };

        if !self.flows.contains_key(key) && self.flows.len() >= self.max_flows {
            self.make_room();
        }

        let now = Instant::now();
        let entry = self.flows.entry(*key).or_insert(FlowEntry {
            frames: 0,
            last_seen: now,
        });
        entry.frames += 1;
        entry.last_seen = now;
        if entry.frames == 1 {
            info!(flow = %key, counter = frame.counter, "New flow");
        }
        Ok(ChainResult::Continue)
    }

    fn dispose(&mut self) -> Result<(), AnalyzerError> {
        let mut flows: Vec<_> = self.flows.iter().collect();
        flows.sort_by(|a, b| b.1.frames.cmp(&a.1.frames));
        for (key, entry) in flows.into_iter().take(10) {
            info!(flow = %key, frames = entry.frames, "Flow summary");
        }
        self.flows.clear();
        Ok(())
    }
}

export_analyzers!(FrameLogger, TcpFlows, UdpFlows, FlowCounter);

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;
    use tzsp_analyzer_api::{ApiReference, LinkLayer};

    fn ethernet_ipv4(protocol: u8, transport: &[u8]) -> Vec<u8> {
        let total_len = (20 + transport.len()) as u16;
        let mut frame = vec![
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // dst
            0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, // src
            0x08, 0x00, // IPv4
            0x45, 0x00,
        ];
        frame.extend_from_slice(&total_len.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x40, protocol, 0x00, 0x00]);
        frame.extend_from_slice(&[10, 0, 0, 1, 10, 0, 0, 2]);
        frame.extend_from_slice(transport);
        frame
    }

    fn tcp_frame() -> Vec<u8> {
        ethernet_ipv4(
            6,
            &[
                0xC3, 0x50, 0x01, 0xBB, // 50000 -> 443
                0, 0, 0, 1, 0, 0, 0, 0, // seq, ack
                0x50, 0x02, 0xFF, 0xFF, // data offset 5, SYN
                0, 0, 0, 0,
            ],
        )
    }

    fn udp_frame() -> Vec<u8> {
        ethernet_ipv4(17, &[0x14, 0xE9, 0x00, 0x35, 0x00, 0x08, 0x00, 0x00])
    }

    fn frame(payload: &[u8]) -> Frame<'_> {
        Frame {
            counter: 1,
            arrival: SystemTime::now(),
            link_layer: LinkLayer::Ethernet,
            payload,
        }
    }

    /// Run the exported chain the way the host does
    fn run_chain(chain: &mut [Box<dyn Analyzer>], frame: &Frame<'_>) -> bool {
        let cancel = CancellationToken::new();
        let mut context = None;
        for analyzer in chain.iter_mut() {
            match analyzer.handle(frame, context.as_ref(), &cancel).unwrap() {
                ChainResult::Continue => {}
                ChainResult::ContinueWithNewContext(next) => context = Some(next),
                ChainResult::Stop => return false,
            }
        }
        true
    }

    #[test]
    fn test_descriptor() {
        assert_eq!(TZSP_PLUGIN_DESCRIPTOR.api, ApiReference::CURRENT);
        assert_eq!(
            TZSP_PLUGIN_DESCRIPTOR.manifest,
            &["FrameLogger", "TcpFlows", "UdpFlows", "FlowCounter"]
        );
    }

    #[test]
    fn test_exported_chain() {
        let descriptor = &TZSP_PLUGIN_DESCRIPTOR;
        let mut chain: Vec<Box<dyn Analyzer>> = descriptor
            .manifest
            .iter()
            .map(|id| (descriptor.factory(id).unwrap().create)().unwrap())
            .collect();

        assert!(run_chain(&mut chain, &frame(&tcp_frame())));
        assert!(run_chain(&mut chain, &frame(&udp_frame())));
        assert!(!run_chain(&mut chain, &frame(&[0xAB; 10])));

        for analyzer in &mut chain {
            analyzer.dispose().unwrap();
        }
    }

    #[test]
    fn test_flow_counter_counts_tagged_frames() {
        let data = tcp_frame();
        let mut tagger = TcpFlows::default();
        let mut counter = FlowCounter::default();
        let cancel = CancellationToken::new();

        let ChainResult::ContinueWithNewContext(context) =
            tagger.handle(&frame(&data), None, &cancel).unwrap()
        else {
            panic!("expected a flow context");
        };
        let key = *context.downcast_ref::<FlowKey>().unwrap();
        assert_eq!(key.to_string(), "tcp 10.0.0.1:50000 -> 10.0.0.2:443");

        for _ in 0..3 {
            counter.handle(&frame(&data), Some(&context), &cancel).unwrap();
        }
        assert_eq!(counter.count(&key), 3);

        // UDP frames pass through the TCP tagger untouched
        let udp = udp_frame();
        assert!(matches!(
            tagger.handle(&frame(&udp), None, &cancel).unwrap(),
            ChainResult::Continue
        ));
    }

    fn flow(port: u16) -> FlowKey {
        FlowKey {
            transport: TransportKind::Udp,
            source: ("10.0.0.1".parse().unwrap(), port),
            destination: ("10.0.0.2".parse().unwrap(), 53),
        }
    }

    fn count_flow(counter: &mut FlowCounter, key: FlowKey) {
        let context = AnalysisContext::new(key);
        let cancel = CancellationToken::new();
        counter.handle(&frame(&[]), Some(&context), &cancel).unwrap();
    }

    #[test]
    fn test_flow_counter_evicts_least_recently_seen() {
        let mut counter = FlowCounter::with_limits(2, Duration::from_secs(3600));

        count_flow(&mut counter, flow(1000));
        std::thread::sleep(Duration::from_millis(2));
        count_flow(&mut counter, flow(1001));
        std::thread::sleep(Duration::from_millis(2));
        // Refresh the first flow so the second becomes the oldest
        count_flow(&mut counter, flow(1000));
        std::thread::sleep(Duration::from_millis(2));
        count_flow(&mut counter, flow(1002));

        assert_eq!(counter.len(), 2);
        assert_eq!(counter.count(&flow(1000)), 2);
        assert_eq!(counter.count(&flow(1001)), 0);
        assert_eq!(counter.count(&flow(1002)), 1);
    }

    #[test]
    fn test_flow_counter_drops_idle_flows_first() {
        let mut counter = FlowCounter::with_limits(3, Duration::from_millis(250));

        count_flow(&mut counter, flow(1000));
        count_flow(&mut counter, flow(1001));
        std::thread::sleep(Duration::from_millis(500));
        count_flow(&mut counter, flow(1002));
        assert_eq!(counter.len(), 3);

        // At the limit: both idle flows go, not just the oldest
        count_flow(&mut counter, flow(1003));
        assert_eq!(counter.len(), 2);
        assert_eq!(counter.count(&flow(1002)), 1);
        assert_eq!(counter.count(&flow(1003)), 1);
    }

    #[test]
    fn test_flow_counter_known_flow_never_evicts() {
        let mut counter = FlowCounter::with_limits(1, Duration::from_secs(3600));
        for _ in 0..5 {
            count_flow(&mut counter, flow(1000));
        }
        assert_eq!(counter.len(), 1);
        assert_eq!(counter.count(&flow(1000)), 5);
    }

    #[test]
    fn test_cleanup_forgets_idle_flows() {
        let mut counter = FlowCounter::with_limits(8, Duration::from_millis(10));
        count_flow(&mut counter, flow(1000));
        std::thread::sleep(Duration::from_millis(30));
        counter.cleanup();
        assert!(counter.is_empty());
    }
}

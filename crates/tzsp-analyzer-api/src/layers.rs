//! Protocol layer views over an encapsulated frame
//!
//! Thin wrappers over `pnet_packet` that walk Ethernet → IPv4/IPv6 → TCP/UDP
//! without copying. Only Ethernet framing is descended into; other link
//! layers yield empty [`Layers`].

use pnet_packet::ethernet::{EtherTypes, EthernetPacket};
use pnet_packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::ipv6::Ipv6Packet;
use pnet_packet::tcp::TcpPacket;
use pnet_packet::udp::UdpPacket;
use std::net::IpAddr;

use crate::analyzer::{AnalysisContext, Analyzer, AnalyzerError, CancellationToken, ChainResult};
use crate::frame::{Frame, LinkLayer};

const ETHERNET_HEADER_LEN: usize = 14;
const IPV6_HEADER_LEN: usize = 40;

/// Network layer of a frame
pub enum Network<'a> {
    /// IPv4 packet
    Ipv4(Ipv4Packet<'a>),
    /// IPv6 packet
    Ipv6(Ipv6Packet<'a>),
}

/// Transport layer of a frame
pub enum Transport<'a> {
    /// TCP segment
    Tcp(TcpPacket<'a>),
    /// UDP datagram
    Udp(UdpPacket<'a>),
}

/// Transport protocol selector for [`Filtered`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

/// Parsed layers of one frame
#[derive(Default)]
pub struct Layers<'a> {
    /// Ethernet header, if the frame is Ethernet framed
    pub ethernet: Option<EthernetPacket<'a>>,
    /// IP layer, if recognised
    pub network: Option<Network<'a>>,
    /// Transport layer, if recognised
    pub transport: Option<Transport<'a>>,
}

impl<'a> Layers<'a> {
    /// Parse as many layers as the payload allows
    pub fn parse(link_layer: LinkLayer, payload: &'a [u8]) -> Self {
        let mut layers = Self::default();
        if link_layer != LinkLayer::Ethernet {
            return layers;
        }

        let Some(ethernet) = EthernetPacket::new(payload) else {
            return layers;
        };
        let ether_type = ethernet.get_ethertype();
        layers.ethernet = Some(ethernet);
        let ip = &payload[ETHERNET_HEADER_LEN..];

        let (network, next, segment) = if ether_type == EtherTypes::Ipv4 {
            let Some(packet) = Ipv4Packet::new(ip) else {
                return layers;
            };
            let header_len = usize::from(packet.get_header_length()) * 4;
            let total_len = usize::from(packet.get_total_length()).min(ip.len());
            if header_len < 20 || header_len > total_len {
                layers.network = Some(Network::Ipv4(packet));
                return layers;
            }
            let next = packet.get_next_level_protocol();
            (Network::Ipv4(packet), next, &ip[header_len..total_len])
        } else if ether_type == EtherTypes::Ipv6 {
            let Some(packet) = Ipv6Packet::new(ip) else {
                return layers;
            };
            let end = (IPV6_HEADER_LEN + usize::from(packet.get_payload_length())).min(ip.len());
            let next = packet.get_next_header();
            (Network::Ipv6(packet), next, &ip[IPV6_HEADER_LEN..end])
        } else {
            return layers;
        };

        layers.network = Some(network);
        layers.transport = parse_transport(next, segment);
        layers
    }

    /// TCP segment, if present
    pub fn tcp(&self) -> Option<&TcpPacket<'a>> {
        match &self.transport {
            Some(Transport::Tcp(tcp)) => Some(tcp),
            _ => None,
        }
    }

    /// UDP datagram, if present
    pub fn udp(&self) -> Option<&UdpPacket<'a>> {
        match &self.transport {
            Some(Transport::Udp(udp)) => Some(udp),
            _ => None,
        }
    }

    /// Kind of the transport layer, if present
    pub fn transport_kind(&self) -> Option<TransportKind> {
        match &self.transport {
            Some(Transport::Tcp(_)) => Some(TransportKind::Tcp),
            Some(Transport::Udp(_)) => Some(TransportKind::Udp),
            None => None,
        }
    }

    /// Source and destination addresses
    pub fn addresses(&self) -> Option<(IpAddr, IpAddr)> {
        match &self.network {
            Some(Network::Ipv4(ip)) => Some((ip.get_source().into(), ip.get_destination().into())),
            Some(Network::Ipv6(ip)) => Some((ip.get_source().into(), ip.get_destination().into())),
            None => None,
        }
    }

    /// Source and destination ports
    pub fn ports(&self) -> Option<(u16, u16)> {
        match &self.transport {
            Some(Transport::Tcp(tcp)) => Some((tcp.get_source(), tcp.get_destination())),
            Some(Transport::Udp(udp)) => Some((udp.get_source(), udp.get_destination())),
            None => None,
        }
    }
}

fn parse_transport(next: IpNextHeaderProtocol, segment: &[u8]) -> Option<Transport<'_>> {
    if next == IpNextHeaderProtocols::Tcp {
        TcpPacket::new(segment).map(Transport::Tcp)
    } else if next == IpNextHeaderProtocols::Udp {
        UdpPacket::new(segment).map(Transport::Udp)
    } else {
        None
    }
}

/// Analyzer that only cares about one transport protocol
///
/// Wrap it in [`Filtered`] to get an [`Analyzer`].
pub trait LayerAnalyzer: Send {
    /// Transport protocol this analyzer handles
    const TRANSPORT: TransportKind;

    /// Handle a frame carrying [`Self::TRANSPORT`]
    fn handle_layers(
        &mut self,
        frame: &Frame<'_>,
        layers: &Layers<'_>,
        context: Option<&AnalysisContext>,
        cancel: &CancellationToken,
    ) -> Result<ChainResult, AnalyzerError>;

    /// Release resources held by the analyzer
    fn dispose(&mut self) -> Result<(), AnalyzerError> {
        Ok(())
    }
}

/// Runs the inner analyzer for matching frames; everything else continues
#[derive(Debug, Default)]
pub struct Filtered<T>(pub T);

impl<T: LayerAnalyzer> Analyzer for Filtered<T> {
    fn handle(
        &mut self,
        frame: &Frame<'_>,
        context: Option<&AnalysisContext>,
        cancel: &CancellationToken,
    ) -> Result<ChainResult, AnalyzerError> {
        let layers = frame.layers();
        if layers.transport_kind() == Some(T::TRANSPORT) {
            self.0.handle_layers(frame, &layers, context, cancel)
        } else {
            Ok(ChainResult::Continue)
        }
    }

    fn dispose(&mut self) -> Result<(), AnalyzerError> {
        self.0.dispose()
    }
}

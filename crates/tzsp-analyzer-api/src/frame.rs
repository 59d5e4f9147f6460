//! Decoded frame handed to analyzers

use std::fmt;
use std::time::SystemTime;

use crate::layers::Layers;

/// Framing of the encapsulated frame, from the TZSP protocol field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkLayer {
    /// Ethernet II (protocol 1)
    Ethernet,
    /// IEEE 802.11 (protocol 18)
    Ieee802,
    /// Any other protocol value
    Null,
}

impl LinkLayer {
    /// Map a TZSP protocol identifier
    pub fn from_protocol(protocol: u16) -> Self {
        match protocol {
            1 => Self::Ethernet,
            18 => Self::Ieee802,
            _ => Self::Null,
        }
    }
}

impl fmt::Display for LinkLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ethernet => "ethernet",
            Self::Ieee802 => "ieee802",
            Self::Null => "null",
        };
        f.write_str(name)
    }
}

/// One encapsulated frame recovered from a TZSP datagram
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Arrival counter of the carrying datagram
    pub counter: u64,
    /// Arrival time of the carrying datagram
    pub arrival: SystemTime,
    /// Link layer of `payload`
    pub link_layer: LinkLayer,
    /// The encapsulated frame bytes
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Parse the protocol layers of the payload
    pub fn layers(&self) -> Layers<'a> {
        Layers::parse(self.link_layer, self.payload)
    }
}

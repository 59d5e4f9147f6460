//! TZSP header decoding
//!
//! Wire layout (multi-byte fields big-endian):
//!
//! ```text
//! 0        1        2                 4
//! +--------+--------+--------+--------+---------------- - - -+----------- - -
//! | version|  type  |    protocol     | tagged fields ... END | frame ...
//! +--------+--------+--------+--------+---------------- - - -+----------- - -
//! ```
//!
//! Tag `0x00` is one byte of padding, tag `0x01` ends the tag list, any other
//! tag is followed by a length byte and that many value bytes.

use std::ops::Range;
use tzsp_analyzer_api::LinkLayer;

use crate::error::ProtocolError;

/// Supported TZSP version
pub const VERSION: u8 = 1;

/// Length of the fixed header
pub const MIN_HEADER_LEN: usize = 4;

const TAG_PADDING: u8 = 0x00;
const TAG_END: u8 = 0x01;

/// TZSP packet type (header byte 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Received tag list
    Received,
    /// Packet for transmit
    Transmit,
    /// Reserved
    Reserved,
    /// Configuration
    Configuration,
    /// Keepalive
    Keepalive,
    /// Port opener
    PortOpener,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Received),
            1 => Ok(Self::Transmit),
            2 => Ok(Self::Reserved),
            3 => Ok(Self::Configuration),
            4 => Ok(Self::Keepalive),
            5 => Ok(Self::PortOpener),
            other => Err(ProtocolError::InvalidType(other)),
        }
    }
}

/// Result of decoding a TZSP header
///
/// Holds a view (offset and length) into the decoded datagram rather than a
/// copy of the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHeader {
    /// Link layer of the encapsulated frame
    pub link_layer: LinkLayer,
    /// Packet type
    pub packet_type: PacketType,
    /// Position of the encapsulated frame in the datagram
    pub payload: Range<usize>,
}

impl DecodedHeader {
    /// Slice the encapsulated frame out of the datagram this header was decoded from
    pub fn payload<'a>(&self, datagram: &'a [u8]) -> &'a [u8] {
        &datagram[self.payload.clone()]
    }
}

/// Decode the TZSP header of a datagram
///
/// Only the header and tag region is scanned. The frame that follows the
/// end tag is not inspected and may be empty.
pub fn decode(bytes: &[u8]) -> Result<DecodedHeader, ProtocolError> {
    if bytes.len() < MIN_HEADER_LEN {
        return Err(ProtocolError::TooShort {
            expected: MIN_HEADER_LEN,
            actual: bytes.len(),
        });
    }

    if bytes[0] != VERSION {
        return Err(ProtocolError::VersionMismatch {
            expected: VERSION,
            actual: bytes[0],
        });
    }

    let packet_type = PacketType::try_from(bytes[1])?;

    let protocol = u16::from_be_bytes([bytes[2], bytes[3]]);
    let link_layer = LinkLayer::from_protocol(protocol);

    let truncated = |offset| ProtocolError::Truncated {
        offset,
        length: bytes.len(),
    };

    let mut pos = MIN_HEADER_LEN;
    loop {
        let tag = *bytes.get(pos).ok_or_else(|| truncated(pos))?;
        match tag {
            TAG_PADDING => pos += 1,
            TAG_END => {
                return Ok(DecodedHeader {
                    link_layer,
                    packet_type,
                    payload: pos + 1..bytes.len(),
                });
            }
            _ => {
                let len = *bytes.get(pos + 1).ok_or_else(|| truncated(pos))?;
                pos += 2 + usize::from(len);
            }
        }
    }
}

/// Decode a datagram into its link layer and encapsulated frame
pub fn decode_frame(bytes: &[u8]) -> Result<(LinkLayer, &[u8]), ProtocolError> {
    let header = decode(bytes)?;
    Ok((header.link_layer, header.payload(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_ethernet() {
        let bytes = [0x01, 0x00, 0x00, 0x01, 0x01, 0xAA, 0xBB, 0xCC];
        let (link, payload) = decode_frame(&bytes).unwrap();
        assert_eq!(link, LinkLayer::Ethernet);
        assert_eq!(payload, &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_padding_and_tags_are_skipped() {
        let bytes = [
            0x01, 0x00, 0x00, 0x12, // version, type, IEEE 802.11
            0x00, 0x00, // padding
            0x0A, 0x02, 0xFF, 0xFF, // tag 10, two value bytes
            0x28, 0x00, // tag 40, empty value
            0x01, // end
            0x42,
        ];
        let header = decode(&bytes).unwrap();
        assert_eq!(header.link_layer, LinkLayer::Ieee802);
        assert_eq!(header.payload, 13..14);
        assert_eq!(header.payload(&bytes), &[0x42]);
    }

    #[test]
    fn test_unknown_protocol_maps_to_null() {
        let bytes = [0x01, 0x04, 0x00, 0x07, 0x01, 0x00];
        let header = decode(&bytes).unwrap();
        assert_eq!(header.link_layer, LinkLayer::Null);
        assert_eq!(header.packet_type, PacketType::Keepalive);
    }

    #[test]
    fn test_too_short() {
        for len in 0..MIN_HEADER_LEN {
            let bytes = vec![0x01; len];
            assert_eq!(
                decode(&bytes),
                Err(ProtocolError::TooShort {
                    expected: 4,
                    actual: len
                })
            );
        }
    }

    #[test]
    fn test_version_mismatch() {
        let bytes = [0x02, 0x00, 0x00, 0x01, 0x01];
        assert_eq!(
            decode(&bytes),
            Err(ProtocolError::VersionMismatch {
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn test_invalid_type() {
        let bytes = [0x01, 0x06, 0x00, 0x01, 0x01];
        assert_eq!(decode(&bytes), Err(ProtocolError::InvalidType(6)));
    }

    #[test]
    fn test_missing_end_tag() {
        let bytes = [0x01, 0x00, 0x00, 0x01, 0x00, 0x00];
        assert_eq!(
            decode(&bytes),
            Err(ProtocolError::Truncated {
                offset: 6,
                length: 6
            })
        );
    }

    #[test]
    fn test_tag_length_runs_past_end() {
        let bytes = [0x01, 0x00, 0x00, 0x01, 0x0A, 0x10, 0x00];
        assert!(matches!(
            decode(&bytes),
            Err(ProtocolError::Truncated { .. })
        ));

        // Tag byte without its length byte
        let bytes = [0x01, 0x00, 0x00, 0x01, 0x0A];
        assert_eq!(
            decode(&bytes),
            Err(ProtocolError::Truncated {
                offset: 4,
                length: 5
            })
        );
    }

    #[test]
    fn test_end_tag_as_last_byte_gives_empty_payload() {
        let bytes = [0x01, 0x00, 0x00, 0x01, 0x01];
        let (_, payload) = decode_frame(&bytes).unwrap();
        assert!(payload.is_empty());
    }
}

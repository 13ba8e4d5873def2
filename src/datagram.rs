//! Wire format of the network-layer datagram.
//!
//! Datagrams carry a fixed 20-byte header with no options, followed by the
//! payload. This module is responsible for:
//! - Defining the on-wire binary layout.
//! - Serialising a [`DatagramHeader`] plus payload into a byte buffer,
//!   computing the header checksum in the process.
//! - Parsing a raw datagram back into header and payload, returning errors
//!   for malformed or truncated input.
//!
//! No I/O and no checksum *verification* happen here; the network layer
//! decides whether to verify based on the link's policy.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Version|  IHL  |  DSCP     |ECN|          Total Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Identification        |Flags|     Fragment Offset     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      TTL      |    Protocol   |        Header Checksum        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Source Address                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Destination Address                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Payload ...                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::checksum::checksum16;

/// Byte length of the fixed-size header on the wire (IHL = 5, no options).
pub const HEADER_LEN: usize = 20;

/// Protocol number for transport segments.
pub const PROTO_TRANSPORT: u8 = 6;

/// Protocol number for diagnostic messages.
pub const PROTO_DIAGNOSTIC: u8 = 1;

/// TTL placed in every locally-originated datagram.
pub const DEFAULT_TTL: u8 = 64;

/// Parsed datagram header.
///
/// Fields are in host byte order; [`DatagramHeader::encode`] converts to
/// big-endian on the wire and [`DatagramHeader::parse`] converts back.
/// Version and IHL are not stored: parsing rejects anything other than
/// version 4 with a 20-byte header, and encoding always emits exactly that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatagramHeader {
    pub dscp: u8,
    pub ecn: u8,
    pub identification: u16,
    /// 3-bit flags field.
    pub flags: u8,
    /// 13-bit fragment offset.
    pub frag_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl DatagramHeader {
    /// Header for a locally-originated datagram: TTL [`DEFAULT_TTL`], zero
    /// identification, no fragmentation.
    pub fn outbound(protocol: u8, src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        Self {
            dscp: 0,
            ecn: 0,
            identification: 0,
            flags: 0,
            frag_offset: 0,
            ttl: DEFAULT_TTL,
            protocol,
            src,
            dst,
        }
    }

    /// Serialise header plus `payload` into a ready-to-transmit datagram.
    ///
    /// The total-length field is computed from the payload, and the header
    /// checksum is computed with the checksum field zeroed, then written in
    /// place.
    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + payload.len()];

        buf[0] = (4 << 4) | 5; // version 4, IHL 5 words
        buf[1] = (self.dscp << 2) | (self.ecn & 0b11);
        let total_len = (HEADER_LEN + payload.len()) as u16;
        buf[2..4].copy_from_slice(&total_len.to_be_bytes());
        buf[4..6].copy_from_slice(&self.identification.to_be_bytes());
        let flags_frag = (u16::from(self.flags) << 13) | (self.frag_offset & 0x1fff);
        buf[6..8].copy_from_slice(&flags_frag.to_be_bytes());
        buf[8] = self.ttl;
        buf[9] = self.protocol;
        // buf[10..12] stays zero while the checksum is computed.
        buf[12..16].copy_from_slice(&self.src.octets());
        buf[16..20].copy_from_slice(&self.dst.octets());

        let c = checksum16(&buf[..HEADER_LEN]);
        buf[10..12].copy_from_slice(&c.to_be_bytes());

        buf[HEADER_LEN..].copy_from_slice(payload);
        buf
    }

    /// Parse a raw datagram into its header and payload.
    ///
    /// The stored checksum is *not* verified here; callers that want
    /// verification sum the first [`HEADER_LEN`] bytes themselves.
    pub fn parse(raw: &[u8]) -> Result<(Self, &[u8]), DatagramError> {
        if raw.len() < HEADER_LEN {
            return Err(DatagramError::Truncated);
        }
        let version = raw[0] >> 4;
        if version != 4 {
            return Err(DatagramError::BadVersion(version));
        }
        let ihl = raw[0] & 0x0f;
        if ihl != 5 {
            // Options are not supported anywhere in this stack.
            return Err(DatagramError::UnsupportedHeaderLength(ihl));
        }

        let flags_frag = u16::from_be_bytes([raw[6], raw[7]]);
        let header = Self {
            dscp: raw[1] >> 2,
            ecn: raw[1] & 0b11,
            identification: u16::from_be_bytes([raw[4], raw[5]]),
            flags: (flags_frag >> 13) as u8,
            frag_offset: flags_frag & 0x1fff,
            ttl: raw[8],
            protocol: raw[9],
            src: Ipv4Addr::new(raw[12], raw[13], raw[14], raw[15]),
            dst: Ipv4Addr::new(raw[16], raw[17], raw[18], raw[19]),
        };
        Ok((header, &raw[HEADER_LEN..]))
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatagramError {
    #[error("datagram shorter than the fixed header")]
    Truncated,
    #[error("unsupported version {0}")]
    BadVersion(u8),
    #[error("unsupported header length of {0} words")]
    UnsupportedHeaderLength(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> DatagramHeader {
        DatagramHeader::outbound(
            PROTO_TRANSPORT,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        )
    }

    #[test]
    fn encode_parse_round_trip() {
        let hdr = header();
        let raw = hdr.encode(b"payload");
        let (parsed, payload) = DatagramHeader::parse(&raw).unwrap();
        assert_eq!(parsed, hdr);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn encoded_header_checksum_verifies() {
        let raw = header().encode(b"abc");
        assert_eq!(checksum16(&raw[..HEADER_LEN]), 0);
    }

    #[test]
    fn total_length_field_matches() {
        let raw = header().encode(&[0u8; 11]);
        assert_eq!(u16::from_be_bytes([raw[2], raw[3]]), 31);
    }

    #[test]
    fn truncated_input_rejected() {
        assert_eq!(
            DatagramHeader::parse(&[0u8; HEADER_LEN - 1]),
            Err(DatagramError::Truncated)
        );
    }

    #[test]
    fn wrong_version_rejected() {
        let mut raw = header().encode(b"");
        raw[0] = (6 << 4) | 5;
        assert_eq!(DatagramHeader::parse(&raw), Err(DatagramError::BadVersion(6)));
    }

    #[test]
    fn options_rejected() {
        let mut raw = header().encode(b"");
        raw[0] = (4 << 4) | 6;
        assert_eq!(
            DatagramHeader::parse(&raw),
            Err(DatagramError::UnsupportedHeaderLength(6))
        );
    }

    #[test]
    fn flags_and_fragment_offset_packed() {
        let mut hdr = header();
        hdr.flags = 0b010;
        hdr.frag_offset = 0x1234;
        let raw = hdr.encode(b"");
        assert_eq!(
            u16::from_be_bytes([raw[6], raw[7]]),
            (0b010 << 13) | 0x1234
        );
        let (parsed, _) = DatagramHeader::parse(&raw).unwrap();
        assert_eq!(parsed.flags, 0b010);
        assert_eq!(parsed.frag_offset, 0x1234);
    }
}

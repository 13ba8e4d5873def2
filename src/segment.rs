//! Wire format of the transport-layer segment.
//!
//! Segments ride inside datagrams with protocol number
//! [`crate::datagram::PROTO_TRANSPORT`]. The checksum covers a
//! pseudo-header of source address, destination address, protocol and
//! segment length concatenated with the segment itself, so a segment
//! cannot be replayed between different address pairs.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Source Port          |       Destination Port        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Offset|         Flags         |          Window Size          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Checksum            |        Urgent Pointer         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Payload ...                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The data offset is counted in 32-bit words; this stack always emits 5
//! (no options) but accepts larger offsets on input, skipping the extra
//! words.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::checksum::pseudo_header_checksum;
use crate::datagram::PROTO_TRANSPORT;

/// Byte length of the fixed-size header on the wire (offset = 5 words).
pub const HEADER_LEN: usize = 20;

/// Maximum segment payload size in bytes.
pub const MSS: usize = 1460;

/// Receive window advertised in every outbound segment. Flow control
/// beyond this fixed advertisement is out of scope.
pub const DEFAULT_WINDOW: u16 = 8192;

/// Bit-flag constants for the low 12 bits of the offset/flags word.
pub mod flags {
    /// Sender has no more data; consumes one sequence number.
    pub const FIN: u16 = 1 << 0;
    /// Synchronise sequence numbers; consumes one sequence number.
    pub const SYN: u16 = 1 << 1;
    /// Reset the connection.
    pub const RST: u16 = 1 << 2;
    /// Push buffered data to the application.
    pub const PSH: u16 = 1 << 3;
    /// Acknowledgment field is valid.
    pub const ACK: u16 = 1 << 4;
    /// Urgent pointer is valid.
    pub const URG: u16 = 1 << 5;
}

/// Fixed-size segment header.
///
/// Fields are in host byte order; [`SegmentHeader::encode`] converts to
/// big-endian on the wire and [`SegmentHeader::parse`] converts back. The
/// data offset is not stored: encoding always emits 5 words, and parsing
/// returns the payload offset separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub src_port: u16,
    pub dst_port: u16,
    /// Sequence number of the first payload byte in this segment.
    pub seq: u32,
    /// Next sequence number expected from the peer.
    pub ack: u32,
    /// Bitmask of [`flags`] constants (low 12 bits of the offset word).
    pub flags: u16,
    /// Advertised receive window in bytes.
    pub window: u16,
    pub urg: u16,
}

impl SegmentHeader {
    /// Header with the default window and a zero urgent pointer.
    pub fn new(src_port: u16, dst_port: u16, seq: u32, ack: u32, flags: u16) -> Self {
        Self {
            src_port,
            dst_port,
            seq,
            ack,
            flags,
            window: DEFAULT_WINDOW,
            urg: 0,
        }
    }

    /// `true` when `flag` (one of the [`flags`] constants) is set.
    pub fn has(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    /// Serialise header plus `payload` into a checksummed segment.
    ///
    /// `src_addr`/`dst_addr` enter the pseudo-header only; they are not
    /// part of the segment itself.
    pub fn encode(&self, payload: &[u8], src_addr: Ipv4Addr, dst_addr: Ipv4Addr) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + payload.len()];

        buf[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        buf[4..8].copy_from_slice(&self.seq.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ack.to_be_bytes());
        let offset_flags = (5u16 << 12) | (self.flags & 0x0fff);
        buf[12..14].copy_from_slice(&offset_flags.to_be_bytes());
        buf[14..16].copy_from_slice(&self.window.to_be_bytes());
        // buf[16..18] stays zero while the checksum is computed.
        buf[18..20].copy_from_slice(&self.urg.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(payload);

        let c = pseudo_header_checksum(src_addr, dst_addr, PROTO_TRANSPORT, &buf);
        buf[16..18].copy_from_slice(&c.to_be_bytes());
        buf
    }

    /// Parse a raw segment into its header and the payload offset.
    ///
    /// The checksum is *not* verified here; the listener decides whether
    /// to verify based on the link's policy.
    pub fn parse(raw: &[u8]) -> Result<(Self, usize), SegmentError> {
        if raw.len() < HEADER_LEN {
            return Err(SegmentError::Truncated);
        }
        let offset_flags = u16::from_be_bytes([raw[12], raw[13]]);
        let data_offset = usize::from(offset_flags >> 12) * 4;
        if data_offset < HEADER_LEN || data_offset > raw.len() {
            return Err(SegmentError::BadDataOffset);
        }
        let header = Self {
            src_port: u16::from_be_bytes([raw[0], raw[1]]),
            dst_port: u16::from_be_bytes([raw[2], raw[3]]),
            seq: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
            ack: u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]),
            flags: offset_flags & 0x0fff,
            window: u16::from_be_bytes([raw[14], raw[15]]),
            urg: u16::from_be_bytes([raw[18], raw[19]]),
        };
        Ok((header, data_offset))
    }
}

/// Errors that can arise when parsing a raw segment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("segment shorter than the fixed header")]
    Truncated,
    #[error("data offset points outside the segment")]
    BadDataOffset,
}

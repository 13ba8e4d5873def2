//! Diagnostic (ICMP-style) message synthesis.
//!
//! The only message this stack ever generates is Time-Exceeded, produced by
//! a router when a datagram arrives with an expired TTL. The message quotes
//! the offending datagram's 20-byte header plus up to 8 bytes of its
//! payload, so the original sender can match the diagnostic to the flow
//! that triggered it.
//!
//! # Wire format
//!
//! ```text
//! +--------+--------+----------------+
//! |  Type  |  Code  |    Checksum    |
//! +--------+--------+----------------+
//! |             Unused              |
//! +---------------------------------+
//! | Original header + <= 8 payload  |
//! |             bytes               |
//! +---------------------------------+
//! ```

use crate::checksum::checksum16;
use crate::datagram;

/// Message type: Time-Exceeded.
pub const TYPE_TIME_EXCEEDED: u8 = 11;

/// Code for TTL expiry in transit.
pub const CODE_TTL_EXPIRED: u8 = 0;

/// Byte length of the fixed diagnostic header.
pub const HEADER_LEN: usize = 8;

/// Maximum number of original payload bytes quoted after the header.
pub const QUOTE_PAYLOAD_MAX: usize = 8;

/// Build a complete Time-Exceeded message quoting `original`, a raw
/// datagram of at least [`datagram::HEADER_LEN`] bytes.
///
/// The checksum covers the whole message and is written in place.
pub fn time_exceeded(original: &[u8]) -> Vec<u8> {
    let quote_end = original
        .len()
        .min(datagram::HEADER_LEN + QUOTE_PAYLOAD_MAX);
    let quote = &original[..quote_end];

    let mut msg = vec![0u8; HEADER_LEN + quote.len()];
    msg[0] = TYPE_TIME_EXCEEDED;
    msg[1] = CODE_TTL_EXPIRED;
    // msg[2..4] is the checksum, zero while summing; msg[4..8] is unused.
    msg[HEADER_LEN..].copy_from_slice(quote);

    let c = checksum16(&msg);
    msg[2..4].copy_from_slice(&c.to_be_bytes());
    msg
}

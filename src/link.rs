//! Link-layer boundary: the transmit contract and the SLIP escape codec.
//!
//! The stack talks to whatever carries its datagrams through the
//! [`LinkLayer`] trait: a single `transmit` primitive plus a policy flag
//! that lets simulation harnesses skip checksum verification. Everything
//! above this trait is pure protocol logic.
//!
//! For real serial lines the [`slip`] module turns discrete datagrams into
//! a self-delimiting byte stream: each datagram is bracketed by END bytes,
//! and END/ESC bytes inside the body are escaped. [`SerialLink`] combines
//! the two for the async driver; it encodes outbound datagrams into frames
//! queued for whoever owns the actual byte stream.

use std::collections::VecDeque;
use std::net::Ipv4Addr;

/// Contract between the network layer and the medium below it.
pub trait LinkLayer {
    /// Hand `datagram` to the directly reachable neighbor `next_hop`.
    fn transmit(&mut self, datagram: &[u8], next_hop: Ipv4Addr);

    /// `true` when inbound checksum verification may be skipped.
    ///
    /// Real links return `false`; test and simulation harnesses that
    /// synthesize traffic without computing checksums return `true`.
    fn checksums_exempt(&self) -> bool {
        false
    }
}

pub mod slip {
    //! SLIP framing: escape codec and incremental deframer.

    /// Frame delimiter.
    pub const END: u8 = 0xC0;
    /// Escape introducer.
    pub const ESC: u8 = 0xDB;
    /// Escaped form of END.
    pub const ESC_END: u8 = 0xDC;
    /// Escaped form of ESC.
    pub const ESC_ESC: u8 = 0xDD;

    /// Encode one datagram as a frame: END, escaped body, END.
    pub fn encode(datagram: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(datagram.len() + 2);
        frame.push(END);
        for &byte in datagram {
            match byte {
                END => frame.extend_from_slice(&[ESC, ESC_END]),
                ESC => frame.extend_from_slice(&[ESC, ESC_ESC]),
                _ => frame.push(byte),
            }
        }
        frame.push(END);
        frame
    }

    /// Incremental frame extractor.
    ///
    /// Feed it raw bytes as they arrive from the line; it returns every
    /// complete datagram delimited so far. Escape pairs split across two
    /// `feed` calls are handled because unescaping only happens once a
    /// whole frame is delimited. Empty frames (back-to-back END bytes,
    /// used by some senders to flush line noise) produce nothing.
    #[derive(Debug, Default)]
    pub struct Deframer {
        frame: Vec<u8>,
    }

    impl Deframer {
        pub fn new() -> Self {
            Self::default()
        }

        /// Consume `bytes` and return the datagrams completed by them.
        pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
            let mut datagrams = Vec::new();
            for &byte in bytes {
                if byte != END {
                    self.frame.push(byte);
                    continue;
                }
                if !self.frame.is_empty() {
                    let datagram = unescape(&self.frame);
                    self.frame.clear();
                    if !datagram.is_empty() {
                        datagrams.push(datagram);
                    }
                }
            }
            datagrams
        }
    }

    /// Reverse the escape encoding of one frame body.
    ///
    /// A dangling ESC (at end of frame, or followed by an unknown code) is
    /// passed through as a literal ESC rather than dropping the frame.
    fn unescape(body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(body.len());
        let mut i = 0;
        while i < body.len() {
            if body[i] == ESC {
                match body.get(i + 1) {
                    Some(&ESC_END) => {
                        out.push(END);
                        i += 2;
                    }
                    Some(&ESC_ESC) => {
                        out.push(ESC);
                        i += 2;
                    }
                    _ => {
                        out.push(ESC);
                        i += 1;
                    }
                }
            } else {
                out.push(body[i]);
                i += 1;
            }
        }
        out
    }
}

/// Link implementation for one point-to-point serial line.
///
/// `transmit` SLIP-encodes the datagram and queues the frame; the driver
/// loop drains the queue into the actual byte stream with
/// [`SerialLink::pop_frame`]. The next-hop address is not needed to pick a
/// line (there is only one), so it is only logged.
#[derive(Debug, Default)]
pub struct SerialLink {
    outbox: VecDeque<Vec<u8>>,
}

impl SerialLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next encoded frame waiting for the wire, oldest first.
    pub fn pop_frame(&mut self) -> Option<Vec<u8>> {
        self.outbox.pop_front()
    }

    /// Number of frames waiting for the wire.
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }
}

impl LinkLayer for SerialLink {
    fn transmit(&mut self, datagram: &[u8], next_hop: Ipv4Addr) {
        log::trace!("[link] frame for {next_hop} ({} bytes)", datagram.len());
        self.outbox.push_back(slip::encode(datagram));
    }
}

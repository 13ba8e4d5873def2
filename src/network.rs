//! Network layer: routing, forwarding, local delivery and diagnostics.
//!
//! [`NetworkLayer`] owns the routing table and the local address, and is
//! the only component that talks to the link. Inbound datagrams are
//! demultiplexed into two paths:
//!
//! - **host**: the destination is the local address; transport payloads
//!   are handed upward to the caller,
//! - **router**: anything else is forwarded by longest-prefix match with
//!   the TTL decremented, or answered with a Time-Exceeded diagnostic
//!   when the TTL has run out.
//!
//! Packet processing never mutates the table or the local address; both
//! change only through explicit configuration calls.

use std::net::Ipv4Addr;

use crate::checksum::checksum16;
use crate::datagram::{self, DatagramHeader, PROTO_DIAGNOSTIC, PROTO_TRANSPORT};
use crate::icmp;
use crate::link::LinkLayer;
use crate::route::{RouteError, RouteTable};

/// A transport payload delivered to this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub payload: Vec<u8>,
}

/// The network layer for one node, generic over the link below it.
#[derive(Debug)]
pub struct NetworkLayer<L: LinkLayer> {
    link: L,
    local_addr: Option<Ipv4Addr>,
    table: RouteTable,
}

impl<L: LinkLayer> NetworkLayer<L> {
    /// A node with no address and an empty routing table. Until both are
    /// configured every datagram is dropped.
    pub fn new(link: L) -> Self {
        Self {
            link,
            local_addr: None,
            table: RouteTable::new(),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn local_addr(&self) -> Option<Ipv4Addr> {
        self.local_addr
    }

    /// Set the address under which this node accepts local delivery.
    pub fn set_local_addr(&mut self, addr: Ipv4Addr) {
        self.local_addr = Some(addr);
    }

    /// Replace the routing table wholesale from `(CIDR, next hop)` pairs.
    pub fn set_routes<'a, I>(&mut self, entries: I) -> Result<(), RouteError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.table = RouteTable::parse(entries)?;
        log::debug!("[net] routing table replaced ({} entries)", self.table.len());
        Ok(())
    }

    /// `true` when the link allows skipping checksum verification.
    pub fn checksums_exempt(&self) -> bool {
        self.link.checksums_exempt()
    }

    /// Wrap `segment` in a transport datagram and send it toward `dst`.
    ///
    /// Dropped silently when the local address is unset or no route
    /// matches `dst`.
    pub fn send_transport(&mut self, segment: &[u8], dst: Ipv4Addr) {
        let Some(src) = self.local_addr else {
            log::warn!("[net] send with no local address configured");
            return;
        };
        let Some(next_hop) = self.table.lookup(dst) else {
            log::debug!("[net] no route to {dst}, dropping {} bytes", segment.len());
            return;
        };
        let header = DatagramHeader::outbound(PROTO_TRANSPORT, src, dst);
        self.link.transmit(&header.encode(segment), next_hop);
    }

    /// Process one raw datagram from the link.
    ///
    /// Returns a [`Delivery`] when the datagram is a transport payload for
    /// this host; forwarding and diagnostics are handled internally and
    /// return `None`, as do all drops.
    pub fn handle_datagram(&mut self, raw: &[u8]) -> Option<Delivery> {
        let (header, payload) = match DatagramHeader::parse(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::debug!("[net] unparseable datagram: {e}");
                return None;
            }
        };
        if !self.link.checksums_exempt() && checksum16(&raw[..datagram::HEADER_LEN]) != 0 {
            log::debug!("[net] header checksum mismatch from {}", header.src);
            return None;
        }

        if Some(header.dst) == self.local_addr {
            // Host path.
            if header.protocol == PROTO_TRANSPORT {
                return Some(Delivery {
                    src: header.src,
                    dst: header.dst,
                    payload: payload.to_vec(),
                });
            }
            log::debug!(
                "[net] local datagram with protocol {} discarded",
                header.protocol
            );
            return None;
        }

        // Router path.
        if header.ttl <= 1 {
            log::debug!(
                "[net] TTL expired for {} -> {}, answering time-exceeded",
                header.src,
                header.dst
            );
            self.send_time_exceeded(&header, raw);
            return None;
        }
        let Some(next_hop) = self.table.lookup(header.dst) else {
            log::debug!("[net] no route to {} while forwarding", header.dst);
            return None;
        };
        let mut forwarded = header.clone();
        forwarded.ttl -= 1;
        self.link.transmit(&forwarded.encode(payload), next_hop);
        None
    }

    /// Send a Time-Exceeded diagnostic back to the source of `original`.
    ///
    /// The outer header reuses the original identification, DSCP/ECN and
    /// flags/fragment fields so the diagnostic is attributable to the
    /// dropped datagram; TTL and checksum are fresh.
    fn send_time_exceeded(&mut self, original: &DatagramHeader, raw: &[u8]) {
        let Some(local) = self.local_addr else {
            return;
        };
        let Some(next_hop) = self.table.lookup(original.src) else {
            log::debug!("[net] no route back to {} for diagnostic", original.src);
            return;
        };
        let body = icmp::time_exceeded(raw);
        let header = DatagramHeader {
            dscp: original.dscp,
            ecn: original.ecn,
            identification: original.identification,
            flags: original.flags,
            frag_offset: original.frag_offset,
            ttl: datagram::DEFAULT_TTL,
            protocol: PROTO_DIAGNOSTIC,
            src: local,
            dst: original.src,
        };
        self.link.transmit(&header.encode(&body), next_hop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every transmitted datagram instead of sending it anywhere.
    #[derive(Default)]
    struct RecordingLink {
        sent: Vec<(Vec<u8>, Ipv4Addr)>,
        exempt: bool,
    }

    impl LinkLayer for RecordingLink {
        fn transmit(&mut self, datagram: &[u8], next_hop: Ipv4Addr) {
            self.sent.push((datagram.to_vec(), next_hop));
        }

        fn checksums_exempt(&self) -> bool {
            self.exempt
        }
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn node() -> NetworkLayer<RecordingLink> {
        let mut net = NetworkLayer::new(RecordingLink::default());
        net.set_local_addr(ip("10.0.0.7"));
        net.set_routes([
            ("10.0.0.0/24", "10.0.0.1"),
            ("0.0.0.0/0", "10.0.0.2"),
        ])
        .unwrap();
        net
    }

    #[test]
    fn send_uses_longest_prefix_route() {
        let mut net = node();
        net.send_transport(b"seg", ip("10.0.0.5"));
        net.send_transport(b"seg", ip("8.8.8.8"));
        assert_eq!(net.link().sent[0].1, ip("10.0.0.1"));
        assert_eq!(net.link().sent[1].1, ip("10.0.0.2"));
    }

    #[test]
    fn send_without_route_drops() {
        let mut net = NetworkLayer::new(RecordingLink::default());
        net.set_local_addr(ip("10.0.0.7"));
        net.send_transport(b"seg", ip("8.8.8.8"));
        assert!(net.link().sent.is_empty());
    }

    #[test]
    fn local_transport_payload_is_delivered() {
        let mut net = node();
        let raw = DatagramHeader::outbound(PROTO_TRANSPORT, ip("10.0.0.9"), ip("10.0.0.7"))
            .encode(b"hello");
        let delivery = net.handle_datagram(&raw).unwrap();
        assert_eq!(delivery.src, ip("10.0.0.9"));
        assert_eq!(delivery.payload, b"hello");
        assert!(net.link().sent.is_empty());
    }

    #[test]
    fn local_non_transport_payload_is_discarded() {
        let mut net = node();
        let raw = DatagramHeader::outbound(PROTO_DIAGNOSTIC, ip("10.0.0.9"), ip("10.0.0.7"))
            .encode(b"diag");
        assert!(net.handle_datagram(&raw).is_none());
        assert!(net.link().sent.is_empty());
    }

    #[test]
    fn forwarding_decrements_ttl_and_refreshes_checksum() {
        let mut net = node();
        let raw = DatagramHeader::outbound(PROTO_TRANSPORT, ip("8.8.4.4"), ip("10.0.0.99"))
            .encode(b"fwd");
        assert!(net.handle_datagram(&raw).is_none());

        let (out, next_hop) = net.link().sent[0].clone();
        assert_eq!(next_hop, ip("10.0.0.1"));
        let (hdr, payload) = DatagramHeader::parse(&out).unwrap();
        assert_eq!(hdr.ttl, datagram::DEFAULT_TTL - 1);
        assert_eq!(payload, b"fwd");
        assert_eq!(checksum16(&out[..datagram::HEADER_LEN]), 0);
    }

    #[test]
    fn bad_checksum_is_dropped() {
        let mut net = node();
        let mut raw = DatagramHeader::outbound(PROTO_TRANSPORT, ip("10.0.0.9"), ip("10.0.0.7"))
            .encode(b"hello");
        raw[8] ^= 0xff;
        assert!(net.handle_datagram(&raw).is_none());
    }

    #[test]
    fn exempt_link_skips_checksum_verification() {
        let mut net = node();
        net.link_mut().exempt = true;
        let mut raw = DatagramHeader::outbound(PROTO_TRANSPORT, ip("10.0.0.9"), ip("10.0.0.7"))
            .encode(b"hello");
        raw[10..12].copy_from_slice(&[0, 0]); // clobber the checksum
        assert!(net.handle_datagram(&raw).is_some());
    }

    #[test]
    fn ttl_expiry_emits_time_exceeded_instead_of_forwarding() {
        let mut net = node();
        let mut header =
            DatagramHeader::outbound(PROTO_TRANSPORT, ip("8.8.4.4"), ip("10.0.0.99"));
        header.ttl = 1;
        header.identification = 0x1234;
        let raw = header.encode(b"0123456789");
        assert!(net.handle_datagram(&raw).is_none());

        // Exactly one datagram out: the diagnostic, routed toward the
        // original source via the default route.
        assert_eq!(net.link().sent.len(), 1);
        let (out, next_hop) = net.link().sent[0].clone();
        assert_eq!(next_hop, ip("10.0.0.2"));

        let (hdr, body) = DatagramHeader::parse(&out).unwrap();
        assert_eq!(hdr.dst, ip("8.8.4.4"));
        assert_eq!(hdr.src, ip("10.0.0.7"));
        assert_eq!(hdr.protocol, PROTO_DIAGNOSTIC);
        assert_eq!(hdr.ttl, datagram::DEFAULT_TTL);
        assert_eq!(hdr.identification, 0x1234);

        assert_eq!(body[0], icmp::TYPE_TIME_EXCEEDED);
        assert_eq!(body[1], icmp::CODE_TTL_EXPIRED);
        // Quoted original: its 20-byte header then 8 payload bytes.
        assert_eq!(&body[icmp::HEADER_LEN..icmp::HEADER_LEN + 20], &raw[..20]);
        assert_eq!(&body[icmp::HEADER_LEN + 20..], b"01234567");
    }

    #[test]
    fn ttl_expiry_without_return_route_stays_silent() {
        let mut net = NetworkLayer::new(RecordingLink::default());
        net.set_local_addr(ip("10.0.0.7"));
        net.set_routes([("10.0.0.0/24", "10.0.0.1")]).unwrap();
        let mut header =
            DatagramHeader::outbound(PROTO_TRANSPORT, ip("8.8.4.4"), ip("10.0.0.99"));
        header.ttl = 1;
        let raw = header.encode(b"x");
        assert!(net.handle_datagram(&raw).is_none());
        assert!(net.link().sent.is_empty());
    }
}

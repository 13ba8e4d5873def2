//! Transport-layer listener: passive open and segment demultiplexing.
//!
//! A [`Listener`] owns the network layer, a single bound port and the map
//! of active [`Connection`]s keyed by 4-tuple. Inbound segments are
//! checksum-verified (unless the link is exempt), matched against the
//! bound port and dispatched; SYNs perform the passive-open handshake.
//!
//! The listener is also the application boundary: anything a connection
//! wants to tell the application is queued as an [`Event`] and drained by
//! the embedding loop with [`Listener::poll_event`] after each discrete
//! step. Connection removal is deferred the same way: a connection marks
//! itself closed and the listener prunes it once the triggering call has
//! returned, so no state is touched after removal within the same step.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Instant;

use rand::Rng;

use crate::checksum::pseudo_header_checksum;
use crate::conn::{Connection, State};
use crate::datagram::PROTO_TRANSPORT;
use crate::link::LinkLayer;
use crate::network::NetworkLayer;
use crate::segment::{flags, SegmentHeader};

// ---------------------------------------------------------------------------
// Connection identity
// ---------------------------------------------------------------------------

/// The 4-tuple identifying one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
    pub peer_addr: Ipv4Addr,
    pub peer_port: u16,
    pub local_addr: Ipv4Addr,
    pub local_port: u16,
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}<->{}:{}",
            self.peer_addr, self.peer_port, self.local_addr, self.local_port
        )
    }
}

// ---------------------------------------------------------------------------
// Application events
// ---------------------------------------------------------------------------

/// What the transport layer tells the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A passive open completed; the connection is ready for use.
    Accepted(ConnId),
    /// An in-order chunk of the peer's byte stream.
    Data(ConnId, Vec<u8>),
    /// The peer finished its direction of the stream.
    Fin(ConnId),
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Transport endpoint accepting connections on one port.
pub struct Listener<L: LinkLayer> {
    net: NetworkLayer<L>,
    port: u16,
    connections: HashMap<ConnId, Connection>,
    events: VecDeque<Event>,
}

impl<L: LinkLayer> Listener<L> {
    /// Listen on `port` on top of an already configured network layer.
    pub fn new(net: NetworkLayer<L>, port: u16) -> Self {
        Self {
            net,
            port,
            connections: HashMap::new(),
            events: VecDeque::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn network(&self) -> &NetworkLayer<L> {
        &self.net
    }

    pub fn network_mut(&mut self) -> &mut NetworkLayer<L> {
        &mut self.net
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Read-only view of one connection, if it is still live.
    pub fn connection(&self, id: ConnId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Next queued application event, oldest first.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    // -----------------------------------------------------------------------
    // Inbound path
    // -----------------------------------------------------------------------

    /// Process one raw datagram from the link. Forwarding happens inside
    /// the network layer; only host-bound transport payloads reach the
    /// segment path.
    pub fn handle_datagram(&mut self, now: Instant, raw: &[u8]) {
        let Some(delivery) = self.net.handle_datagram(raw) else {
            return;
        };
        self.on_segment(now, delivery.src, delivery.dst, &delivery.payload);
    }

    /// Process one transport segment delivered to this host.
    pub fn on_segment(&mut self, now: Instant, src: Ipv4Addr, dst: Ipv4Addr, seg: &[u8]) {
        let (header, data_offset) = match SegmentHeader::parse(seg) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::debug!("[tcp] unparseable segment from {src}: {e}");
                return;
            }
        };
        if header.dst_port != self.port {
            log::debug!("[tcp] segment for port {} ignored", header.dst_port);
            return;
        }
        if !self.net.checksums_exempt()
            && pseudo_header_checksum(src, dst, PROTO_TRANSPORT, seg) != 0
        {
            log::debug!("[tcp] segment checksum mismatch from {src}");
            return;
        }
        let payload = &seg[data_offset..];
        let id = ConnId {
            peer_addr: src,
            peer_port: header.src_port,
            local_addr: dst,
            local_port: header.dst_port,
        };

        if header.has(flags::SYN) {
            self.passive_open(id, &header);
            return;
        }

        let Self {
            net,
            connections,
            events,
            ..
        } = self;
        if let Some(conn) = connections.get_mut(&id) {
            conn.on_segment(now, &header, payload, net, events);
            if conn.state() == State::Closed {
                connections.remove(&id);
                log::debug!("[tcp] {id} removed from connection map");
            }
        } else {
            log::debug!("[tcp] segment for unknown connection {id} dropped");
        }
    }

    /// Handle a SYN: create a connection for a free 4-tuple and answer
    /// with SYN-ACK. A slot is only reusable once its previous occupant
    /// has fully terminated (closed connections leave the map as soon as
    /// the call that closed them returns); duplicate SYNs for a live
    /// connection are ignored.
    fn passive_open(&mut self, id: ConnId, header: &SegmentHeader) {
        if self.connections.contains_key(&id) {
            log::debug!("[tcp] duplicate SYN for live connection {id} ignored");
            return;
        }

        let isn: u32 = rand::thread_rng().gen();
        let rcv_nxt = header.seq.wrapping_add(1);

        let syn_ack = SegmentHeader::new(
            id.local_port,
            id.peer_port,
            isn,
            rcv_nxt,
            flags::SYN | flags::ACK,
        )
        .encode(&[], id.local_addr, id.peer_addr);
        self.net.send_transport(&syn_ack, id.peer_addr);

        self.connections.insert(id, Connection::new(id, isn, rcv_nxt));
        self.events.push_back(Event::Accepted(id));
        log::debug!("[tcp] accepted {id} (isn={isn})");
    }

    // -----------------------------------------------------------------------
    // Timer path
    // -----------------------------------------------------------------------

    /// Earliest pending retransmission deadline across all connections,
    /// for the embedding loop to sleep until.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.connections.values().filter_map(|c| c.deadline()).min()
    }

    /// Fire the timeout handler of every connection whose deadline has
    /// passed.
    pub fn on_timeout(&mut self, now: Instant) {
        let due: Vec<ConnId> = self
            .connections
            .values()
            .filter(|c| c.timer_due(now))
            .map(|c| c.id())
            .collect();
        let Self {
            net, connections, ..
        } = self;
        for id in due {
            if let Some(conn) = connections.get_mut(&id) {
                conn.on_timeout(now, net);
                if conn.state() == State::Closed {
                    connections.remove(&id);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Application path
    // -----------------------------------------------------------------------

    /// Write application bytes to a connection's stream. Unknown or
    /// already-closed connections are a no-op.
    pub fn write(&mut self, id: ConnId, data: &[u8], now: Instant) {
        let Self {
            net, connections, ..
        } = self;
        if let Some(conn) = connections.get_mut(&id) {
            conn.write(data, now, net);
        }
    }

    /// Initiate a graceful close of a connection's local direction.
    pub fn close(&mut self, id: ConnId, now: Instant) {
        let Self {
            net, connections, ..
        } = self;
        if let Some(conn) = connections.get_mut(&id) {
            conn.close(now, net);
            if conn.state() == State::Closed {
                connections.remove(&id);
            }
        }
    }
}

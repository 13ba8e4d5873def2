//! Per-connection reliable-delivery state machine.
//!
//! A [`Connection`] owns everything for one established flow: send and
//! receive sequence counters, the retransmission queue, the congestion
//! controller, the RTT estimator and the retransmission timer. It is
//! driven entirely from the outside, by inbound segments
//! ([`Connection::on_segment`]), timer expiry ([`Connection::on_timeout`])
//! and application calls ([`Connection::write`] / [`Connection::close`]).
//!
//! This module only manages state and emits segments through the network
//! layer; it performs no I/O of its own and never blocks. Inbound data is
//! handed to the application as [`Event`]s pushed onto the listener's
//! queue, which the embedding loop drains *after* segment processing, so
//! application code can never corrupt queue or timer bookkeeping
//! mid-update.
//!
//! # Sequence-number layout
//!
//! ```text
//!   snd_una             snd_nxt
//!      │                   │
//!  ────┼───────────────────┼──────────────────▶ seq space
//!      │ <── in flight ───▶│ <── unsent buffer
//! ```
//!
//! Sequence numbers wrap; comparisons use the convention that two values
//! are "close" when their difference is below half the number space.

use std::collections::VecDeque;
use std::time::Instant;

use crate::congestion::CongestionController;
use crate::link::LinkLayer;
use crate::listener::{ConnId, Event};
use crate::network::NetworkLayer;
use crate::segment::{flags, SegmentHeader, MSS};
use crate::timer::{RetransmitTimer, RttEstimator};

// ---------------------------------------------------------------------------
// Sequence-number helpers
// ---------------------------------------------------------------------------

/// `true` when sequence number `a` is ≤ `b` in wrap-around space.
#[inline]
fn seq_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= u32::MAX / 2
}

/// `true` when sequence number `a` is strictly before `b`.
#[inline]
fn seq_lt(a: u32, b: u32) -> bool {
    a != b && seq_le(a, b)
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Lifecycle state of a connection.
///
/// Only passive opens exist, so there is no SYN-SENT. A connection reaches
/// [`State::Closed`] only once both directions have completed their
/// FIN/ACK exchange; the listener then removes it from the connection map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// SYN-ACK sent, waiting for the peer to acknowledge it.
    SynReceived,
    /// Bidirectional data flow.
    Established,
    /// Local FIN sent, not yet acknowledged; peer still open.
    FinWait1,
    /// Local FIN acknowledged; waiting for the peer's FIN.
    FinWait2,
    /// Peer's FIN received and acknowledged; local side still open.
    CloseWait,
    /// Both FINs exchanged; waiting for the peer to acknowledge ours.
    LastAck,
    /// Terminal. The instance is removed from the listener's map.
    Closed,
}

impl State {
    /// `true` once a local FIN has been transmitted.
    pub fn fin_sent(self) -> bool {
        matches!(self, State::FinWait1 | State::FinWait2 | State::LastAck)
    }

    /// `true` once the peer's FIN has been received.
    pub fn fin_received(self) -> bool {
        matches!(self, State::CloseWait | State::LastAck)
    }
}

// ---------------------------------------------------------------------------
// Retransmission queue entry
// ---------------------------------------------------------------------------

/// A transmitted-but-unacknowledged segment, kept for retransmission.
///
/// Entries are ordered by sequence number, appended at the tail and pruned
/// from the head as cumulative acknowledgments retire them.
#[derive(Debug, Clone)]
struct QueuedSegment {
    /// Sequence number of the segment's first byte.
    seq: u32,
    /// The encoded segment, ready to hand back to the network layer.
    wire: Vec<u8>,
    /// Sequence space consumed: payload bytes, plus one for SYN or FIN.
    seq_len: u32,
    /// Time of the most recent transmission.
    sent_at: Instant,
    /// `true` once retransmitted; such entries never yield RTT samples.
    retransmitted: bool,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// State machine for one established flow.
#[derive(Debug)]
pub struct Connection {
    id: ConnId,
    state: State,
    /// Next sequence number to transmit.
    snd_nxt: u32,
    /// Oldest unacknowledged sequence number (window base).
    snd_una: u32,
    /// Next sequence number expected from the peer.
    rcv_nxt: u32,
    queue: VecDeque<QueuedSegment>,
    congestion: CongestionController,
    rtt: RttEstimator,
    timer: RetransmitTimer,
    /// Application bytes not yet carved into segments.
    send_buffer: VecDeque<u8>,
    /// Set by `close`; the FIN goes out once the send buffer drains.
    close_requested: bool,
}

impl Connection {
    /// A freshly accepted connection, right after the SYN-ACK went out.
    ///
    /// `isn` is the local initial sequence number carried by the SYN-ACK;
    /// the counters start one past it because the SYN consumed a sequence
    /// number. `rcv_nxt` is the peer's SYN sequence number plus one.
    pub(crate) fn new(id: ConnId, isn: u32, rcv_nxt: u32) -> Self {
        Self {
            id,
            state: State::SynReceived,
            snd_nxt: isn.wrapping_add(1),
            snd_una: isn.wrapping_add(1),
            rcv_nxt,
            queue: VecDeque::new(),
            congestion: CongestionController::new(),
            rtt: RttEstimator::new(),
            timer: RetransmitTimer::new(),
            send_buffer: VecDeque::new(),
            close_requested: false,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn congestion(&self) -> &CongestionController {
        &self.congestion
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    /// Number of segments awaiting acknowledgment.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Pending retransmission deadline, if the timer is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    pub(crate) fn timer_due(&self, now: Instant) -> bool {
        self.timer.is_due(now)
    }

    // -----------------------------------------------------------------------
    // Inbound segment processing
    // -----------------------------------------------------------------------

    /// Process one checksum-verified segment addressed to this connection.
    pub(crate) fn on_segment<L: LinkLayer>(
        &mut self,
        now: Instant,
        header: &SegmentHeader,
        payload: &[u8],
        net: &mut NetworkLayer<L>,
        events: &mut VecDeque<Event>,
    ) {
        if self.state == State::Closed {
            return;
        }

        let payload_len = payload.len() as u32;
        let has_ack = header.has(flags::ACK);
        let has_fin = header.has(flags::FIN);

        // Out-of-order data or FIN: re-assert the cumulative ACK so the
        // peer retransmits. The segment may still carry a usable
        // acknowledgment, so processing continues when the ACK bit is
        // set; the delivery steps below re-check the sequence number.
        if (payload_len > 0 || has_fin) && header.seq != self.rcv_nxt {
            log::debug!(
                "[tcp] out-of-order seq={} (expected {}), re-acking",
                header.seq,
                self.rcv_nxt
            );
            self.send_ack(net);
            if !has_ack {
                return;
            }
        }

        if has_ack {
            self.process_ack(now, header, payload, net);
            if self.state == State::Closed {
                return;
            }
        }

        // In-order payload delivery.
        if payload_len > 0 && header.seq == self.rcv_nxt {
            self.rcv_nxt = self.rcv_nxt.wrapping_add(payload_len);
            if !self.state.fin_received() {
                events.push_back(Event::Data(self.id, payload.to_vec()));
            }
            // Data arriving past the peer's FIN is acknowledged but not
            // delivered; the stream already ended.
            self.send_ack(net);
        }

        if has_fin {
            // The FIN occupies the sequence position after the payload.
            self.process_fin(header.seq.wrapping_add(payload_len), net, events);
        }
    }

    /// Everything keyed on the acknowledgment number: termination, window
    /// advance, RTT sampling, duplicate-ACK counting.
    fn process_ack<L: LinkLayer>(
        &mut self,
        now: Instant,
        header: &SegmentHeader,
        payload: &[u8],
        net: &mut NetworkLayer<L>,
    ) {
        // The acknowledgment completing the passive open.
        if self.state == State::SynReceived
            && seq_le(self.snd_una, header.ack)
            && seq_le(header.ack, self.snd_nxt)
        {
            self.state = State::Established;
            log::debug!("[tcp] {} established", self.id);
        }

        // Both FINs are out and the peer just acknowledged ours.
        if self.state == State::LastAck && header.ack == self.snd_nxt {
            log::debug!("[tcp] {} fully closed", self.id);
            self.terminate();
            return;
        }

        if seq_lt(self.snd_una, header.ack) && seq_le(header.ack, self.snd_nxt) {
            // The window base advances.
            let newly_acked = header.ack.wrapping_sub(self.snd_una);

            // Retire fully covered queue entries. The oldest one yields an
            // RTT sample when it was never retransmitted, so the sample is
            // attributable to exactly one transmission.
            let mut oldest = true;
            while self
                .queue
                .front()
                .is_some_and(|front| seq_le(front.seq.wrapping_add(front.seq_len), header.ack))
            {
                if let Some(entry) = self.queue.pop_front() {
                    if oldest && !entry.retransmitted {
                        self.rtt.sample(now.duration_since(entry.sent_at));
                    }
                    oldest = false;
                }
            }

            self.snd_una = header.ack;
            self.congestion.on_new_ack(newly_acked);

            if self.queue.is_empty() {
                self.timer.cancel();
            } else {
                self.timer.arm(now + self.rtt.rto());
            }

            if self.state == State::FinWait1 && header.ack == self.snd_nxt {
                // Our FIN is acknowledged; only the peer's FIN remains.
                self.state = State::FinWait2;
            }

            self.try_flush(now, net);
        } else if header.ack == self.snd_una
            && payload.is_empty()
            && !header.has(flags::SYN)
            && !header.has(flags::FIN)
            && !(self.state.fin_sent() && header.ack == self.snd_nxt)
        {
            // A duplicate of the current cumulative ACK.
            if self.congestion.on_duplicate_ack() {
                self.retransmit_oldest(now, net);
            }
        }
    }

    /// Handle the peer's FIN occupying sequence position `fin_seq`.
    fn process_fin<L: LinkLayer>(
        &mut self,
        fin_seq: u32,
        net: &mut NetworkLayer<L>,
        events: &mut VecDeque<Event>,
    ) {
        if fin_seq != self.rcv_nxt {
            // Duplicate or premature FIN; any re-ACK already went out.
            return;
        }
        match self.state {
            State::SynReceived | State::Established => {
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
                events.push_back(Event::Fin(self.id));
                self.send_ack(net);
                self.state = State::CloseWait;
                log::debug!("[tcp] {} peer closed its direction", self.id);
            }
            State::FinWait1 | State::FinWait2 => {
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
                events.push_back(Event::Fin(self.id));
                self.send_ack(net);
                // Local FIN was already sent: both directions are done.
                log::debug!("[tcp] {} fully closed", self.id);
                self.terminate();
            }
            // FIN already accounted for, or the connection is gone.
            State::CloseWait | State::LastAck | State::Closed => {}
        }
    }

    // -----------------------------------------------------------------------
    // Timer
    // -----------------------------------------------------------------------

    /// Retransmission timeout: treat as a loss event.
    pub(crate) fn on_timeout<L: LinkLayer>(&mut self, now: Instant, net: &mut NetworkLayer<L>) {
        if self.queue.is_empty() || self.state == State::Closed {
            self.timer.cancel();
            return;
        }
        log::debug!("[tcp] {} retransmission timeout", self.id);
        self.congestion.on_timeout_loss();
        self.retransmit_oldest(now, net);
    }

    /// Re-send the oldest unacknowledged segment and restart the timer.
    fn retransmit_oldest<L: LinkLayer>(&mut self, now: Instant, net: &mut NetworkLayer<L>) {
        let wire = match self.queue.front_mut() {
            Some(front) => {
                front.retransmitted = true;
                front.sent_at = now;
                log::debug!("[tcp] {} retransmitting seq={}", self.id, front.seq);
                front.wire.clone()
            }
            None => return,
        };
        net.send_transport(&wire, self.id.peer_addr);
        self.timer.arm(now + self.rtt.rto());
    }

    // -----------------------------------------------------------------------
    // Application side
    // -----------------------------------------------------------------------

    /// Append application bytes to the send buffer and flush what the
    /// congestion window allows. Writes after `close` are discarded.
    pub(crate) fn write<L: LinkLayer>(
        &mut self,
        data: &[u8],
        now: Instant,
        net: &mut NetworkLayer<L>,
    ) {
        if self.state == State::Closed || self.close_requested {
            return;
        }
        self.send_buffer.extend(data.iter().copied());
        self.try_flush(now, net);
    }

    /// Initiate a graceful close of the local direction.
    ///
    /// Buffered data is flushed first; the FIN follows as soon as the
    /// buffer is empty. The call never waits for the peer's FIN.
    pub(crate) fn close<L: LinkLayer>(&mut self, now: Instant, net: &mut NetworkLayer<L>) {
        if self.state == State::Closed || self.close_requested {
            return;
        }
        self.close_requested = true;
        self.try_flush(now, net);
    }

    /// Greedily carve segments off the send buffer while the congestion
    /// window has room, then emit the deferred FIN if a close is pending
    /// and the buffer has drained.
    fn try_flush<L: LinkLayer>(&mut self, now: Instant, net: &mut NetworkLayer<L>) {
        if self.state == State::Closed {
            return;
        }
        while !self.send_buffer.is_empty() && !self.state.fin_sent() {
            let available = self.congestion.available_window();
            if available < 1.0 {
                break;
            }
            let chunk_len = self.send_buffer.len().min(MSS).min(available as usize);
            if chunk_len == 0 {
                break;
            }
            let chunk: Vec<u8> = self.send_buffer.drain(..chunk_len).collect();
            self.send_segment(&chunk, 0, now, net);
        }
        if self.close_requested && self.send_buffer.is_empty() && !self.state.fin_sent() {
            self.send_segment(&[], flags::FIN, now, net);
            // From CloseWait (peer already finished) only the final ACK
            // remains; otherwise we wait for both the ACK and a FIN.
            self.state = if self.state == State::CloseWait {
                State::LastAck
            } else {
                State::FinWait1
            };
            log::debug!("[tcp] {} FIN sent", self.id);
        }
    }

    // -----------------------------------------------------------------------
    // Segment emission
    // -----------------------------------------------------------------------

    /// Send a segment carrying `payload` and `extra_flags` (ACK is always
    /// set). Segments that consume sequence space enter the retransmission
    /// queue and restart the timer.
    fn send_segment<L: LinkLayer>(
        &mut self,
        payload: &[u8],
        extra_flags: u16,
        now: Instant,
        net: &mut NetworkLayer<L>,
    ) {
        let out_flags = extra_flags | flags::ACK;
        let header = SegmentHeader::new(
            self.id.local_port,
            self.id.peer_port,
            self.snd_nxt,
            self.rcv_nxt,
            out_flags,
        );
        let wire = header.encode(payload, self.id.local_addr, self.id.peer_addr);

        let mut seq_len = payload.len() as u32;
        if out_flags & (flags::SYN | flags::FIN) != 0 {
            seq_len += 1;
        }
        if seq_len > 0 {
            self.queue.push_back(QueuedSegment {
                seq: self.snd_nxt,
                wire: wire.clone(),
                seq_len,
                sent_at: now,
                retransmitted: false,
            });
            self.congestion.on_segment_sent(payload.len());
        }

        net.send_transport(&wire, self.id.peer_addr);
        self.snd_nxt = self.snd_nxt.wrapping_add(seq_len);
        if seq_len > 0 {
            self.timer.arm(now + self.rtt.rto());
        }
    }

    /// Send the current cumulative ACK (no payload, consumes no sequence
    /// space, never queued).
    fn send_ack<L: LinkLayer>(&self, net: &mut NetworkLayer<L>) {
        if self.state == State::Closed {
            return;
        }
        let header = SegmentHeader::new(
            self.id.local_port,
            self.id.peer_port,
            self.snd_nxt,
            self.rcv_nxt,
            flags::ACK,
        );
        let wire = header.encode(&[], self.id.local_addr, self.id.peer_addr);
        net.send_transport(&wire, self.id.peer_addr);
    }

    /// Enter the terminal state. The listener removes the instance from
    /// its map once the triggering call returns.
    fn terminate(&mut self) {
        self.state = State::Closed;
        self.timer.cancel();
        self.queue.clear();
        self.send_buffer.clear();
    }
}

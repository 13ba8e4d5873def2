//! AIMD congestion controller.
//!
//! One instance per connection tracks the congestion window, the
//! slow-start threshold and the bytes currently in flight. The window is
//! real-valued: growth in congestion avoidance accumulates fractions of a
//! segment across many acknowledgments.
//!
//! Growth rule: acknowledged bytes accumulate in a credit counter, and
//! each time the credit reaches the current window the window grows by
//! one full segment (and the credit is charged that window). Crossing the
//! slow-start threshold ends the credit round early, which is what
//! switches from the slow-start regime to congestion avoidance.
//!
//! Loss handling:
//! - timeout: threshold is half the flight size, window collapses to one
//!   segment (slow start restarts),
//! - third duplicate ACK: threshold is half the flight size, window is
//!   set to threshold plus three segments (fast recovery entry point).

use crate::segment::MSS;

const SEGMENT: f64 = MSS as f64;

/// Initial slow-start threshold, effectively "no threshold yet".
const INITIAL_SSTHRESH: f64 = 65535.0;

/// Number of consecutive duplicate ACKs that signals a lost segment.
const DUP_ACK_LIMIT: u32 = 3;

/// Congestion state for one connection.
#[derive(Debug, Clone)]
pub struct CongestionController {
    /// Congestion window in bytes.
    cwnd: f64,
    /// Slow-start threshold in bytes.
    ssthresh: f64,
    /// Bytes sent but not yet acknowledged.
    bytes_in_flight: f64,
    /// Acknowledged bytes accumulated toward the next window increment.
    acked_credit: f64,
    /// Consecutive duplicate ACKs observed at the current window base.
    dup_acks: u32,
}

impl Default for CongestionController {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionController {
    /// Fresh controller: one segment of window, a large threshold.
    pub fn new() -> Self {
        Self {
            cwnd: SEGMENT,
            ssthresh: INITIAL_SSTHRESH,
            bytes_in_flight: 0.0,
            acked_credit: 0.0,
            dup_acks: 0,
        }
    }

    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> f64 {
        self.ssthresh
    }

    pub fn bytes_in_flight(&self) -> f64 {
        self.bytes_in_flight
    }

    pub fn dup_acks(&self) -> u32 {
        self.dup_acks
    }

    /// Window space left for new segments, in bytes.
    pub fn available_window(&self) -> f64 {
        self.cwnd - self.bytes_in_flight
    }

    /// Account for a newly transmitted segment of `payload_len` bytes.
    pub fn on_segment_sent(&mut self, payload_len: usize) {
        self.bytes_in_flight += payload_len as f64;
    }

    /// Process an acknowledgment that advanced the window base by
    /// `newly_acked` bytes: retire them from the flight, reset the
    /// duplicate-ACK run and grow the window.
    pub fn on_new_ack(&mut self, newly_acked: u32) {
        let newly_acked = f64::from(newly_acked);
        self.bytes_in_flight = (self.bytes_in_flight - newly_acked).max(0.0);
        self.dup_acks = 0;

        self.acked_credit += newly_acked;
        while self.acked_credit >= self.cwnd {
            let charged = self.cwnd;
            self.cwnd += SEGMENT;
            self.acked_credit = (self.acked_credit - charged).max(0.0);
            if self.cwnd > self.ssthresh && charged < self.ssthresh {
                // Crossed into congestion avoidance: the leftover credit
                // from the slow-start round does not carry over.
                self.acked_credit = 0.0;
                break;
            }
        }
    }

    /// Count a duplicate ACK. Returns `true` on exactly the third
    /// consecutive one, after adjusting the window for fast retransmit.
    pub fn on_duplicate_ack(&mut self) -> bool {
        self.dup_acks += 1;
        if self.dup_acks != DUP_ACK_LIMIT {
            return false;
        }
        let flight = if self.bytes_in_flight > 0.0 {
            self.bytes_in_flight
        } else {
            self.cwnd
        };
        self.ssthresh = (flight / 2.0).max(SEGMENT);
        self.cwnd = self.ssthresh + f64::from(DUP_ACK_LIMIT) * SEGMENT;
        self.acked_credit = 0.0;
        log::debug!(
            "[tcp] fast retransmit: ssthresh={:.0} cwnd={:.0}",
            self.ssthresh,
            self.cwnd
        );
        true
    }

    /// Collapse the window after a retransmission timeout.
    pub fn on_timeout_loss(&mut self) {
        let flight = if self.bytes_in_flight > 0.0 {
            self.bytes_in_flight
        } else {
            self.cwnd
        };
        self.ssthresh = (flight / 2.0).max(SEGMENT);
        self.cwnd = SEGMENT;
        self.dup_acks = 0;
        self.acked_credit = 0.0;
        log::debug!(
            "[tcp] timeout loss: ssthresh={:.0} cwnd={:.0}",
            self.ssthresh,
            self.cwnd
        );
    }
}

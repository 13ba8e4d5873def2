//! Retransmission timing: RTT estimation and the per-connection timer.
//!
//! The retransmission timeout (RTO) follows Jacobson/Karels smoothing
//! (RFC 6298):
//!   `RTO = SRTT + 4 × RTTVAR`
//! with a floor of [`MIN_RTO`]. Before the first sample the RTO is a fixed
//! [`INITIAL_RTO`]. Samples are only ever taken from segments that were
//! never retransmitted, so an ACK is always attributable to exactly one
//! transmission.
//!
//! [`RetransmitTimer`] is the cancellable deadline handle owned by each
//! connection: arming replaces any pending deadline, so at most one
//! timeout is outstanding per connection, and cancelling is idempotent.

use std::time::{Duration, Instant};

/// RTO before any RTT sample is available.
pub const INITIAL_RTO: Duration = Duration::from_millis(1000);

/// Lower bound applied to every computed RTO.
pub const MIN_RTO: Duration = Duration::from_millis(200);

/// Smoothed round-trip-time estimator.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT estimate (SRTT); `None` until the first sample.
    srtt: Option<Duration>,
    /// RTT deviation estimate (RTTVAR).
    rttvar: Option<Duration>,
    /// Current retransmission timeout.
    rto: Duration,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            srtt: None,
            rttvar: None,
            rto: INITIAL_RTO,
        }
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Record a new RTT sample and recompute SRTT / RTTVAR / RTO.
    ///
    /// On the first sample:  SRTT = R,  RTTVAR = R/2.
    /// Subsequent samples:   RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|
    ///                       SRTT   = 7/8·SRTT   + 1/8·R
    pub fn sample(&mut self, rtt: Duration) {
        let (srtt, rttvar) = match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => {
                let diff = if rtt > srtt { rtt - srtt } else { srtt - rtt };
                (srtt * 7 / 8 + rtt / 8, rttvar * 3 / 4 + diff / 4)
            }
            _ => (rtt, rtt / 2),
        };
        self.srtt = Some(srtt);
        self.rttvar = Some(rttvar);
        self.rto = (srtt + rttvar * 4).max(MIN_RTO);
    }
}

/// Deadline handle for one connection's retransmission timeout.
///
/// Purely passive: the embedding event loop reads [`deadline`] to know how
/// long to sleep and calls the connection's timeout handler once the
/// deadline passes.
///
/// [`deadline`]: RetransmitTimer::deadline
#[derive(Debug, Clone, Default)]
pub struct RetransmitTimer {
    deadline: Option<Instant>,
}

impl RetransmitTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer, replacing any pending deadline.
    pub fn arm(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Disarm the timer. Cancelling an unarmed timer is a no-op.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Pending deadline, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `true` when armed with a deadline at or before `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if deadline <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rto_before_first_sample_is_initial() {
        assert_eq!(RttEstimator::new().rto(), INITIAL_RTO);
    }

    #[test]
    fn first_sample_initialises_directly() {
        let mut est = RttEstimator::new();
        est.sample(Duration::from_millis(400));
        // SRTT = 400ms, RTTVAR = 200ms, RTO = 400 + 4*200 = 1200ms.
        assert_eq!(est.rto(), Duration::from_millis(1200));
    }

    #[test]
    fn smoothing_follows_jacobson_karels() {
        let mut est = RttEstimator::new();
        est.sample(Duration::from_millis(800));
        est.sample(Duration::from_millis(400));
        // RTTVAR = 3/4*400 + 1/4*|800-400| = 400ms
        // SRTT   = 7/8*800 + 1/8*400       = 750ms
        // RTO    = 750 + 4*400             = 2350ms
        assert_eq!(est.rto(), Duration::from_millis(2350));
    }

    #[test]
    fn rto_floors_at_minimum() {
        let mut est = RttEstimator::new();
        // Identical tiny samples drive RTTVAR toward zero.
        for _ in 0..50 {
            est.sample(Duration::from_millis(10));
        }
        assert_eq!(est.rto(), MIN_RTO);
    }

    #[test]
    fn timer_arm_cancel_due() {
        let now = Instant::now();
        let mut timer = RetransmitTimer::new();
        assert!(!timer.is_due(now));
        assert_eq!(timer.deadline(), None);

        timer.arm(now + Duration::from_secs(1));
        assert!(!timer.is_due(now));
        assert!(timer.is_due(now + Duration::from_secs(1)));

        // Re-arming replaces the pending deadline.
        timer.arm(now + Duration::from_secs(5));
        assert!(!timer.is_due(now + Duration::from_secs(2)));

        timer.cancel();
        assert!(!timer.is_due(now + Duration::from_secs(10)));
        timer.cancel(); // idempotent
        assert_eq!(timer.deadline(), None);
    }
}

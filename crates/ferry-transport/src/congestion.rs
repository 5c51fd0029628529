//! TCP-Reno congestion control.
//!
//! The window grows exponentially in slow start (one packet per new ack),
//! linearly in congestion avoidance (1/cwnd per new ack), and reacts to loss
//! two ways:
//!
//!   - Three duplicate acks: halve `ssthresh`, set `cwnd = ssthresh + 3`,
//!     enter fast recovery, and ask for an immediate retransmission of the
//!     oldest outstanding packet. Further duplicates inflate the window by
//!     one packet each while recovery lasts.
//!   - Retransmission timeout: halve `ssthresh`, collapse `cwnd` to 1, and
//!     fall back to slow start.
//!
//! A new cumulative ack during fast recovery deflates the window back to
//! `ssthresh` and resumes congestion avoidance.
//!
//! `cwnd` is kept as an `f64` so the additive increase of 1/cwnd per ack
//! accumulates exactly; the window loop floors it for admission.

/// Current phase of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionState {
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

/// Congestion window at connection start, in packets.
const INITIAL_CWND: f64 = 1.0;

/// Slow-start threshold at connection start, in packets.
const INITIAL_SSTHRESH: f64 = 16.0;

/// `ssthresh` never collapses below this.
const MIN_SSTHRESH: f64 = 2.0;

/// Consecutive duplicate acks that trigger a fast retransmit.
const DUP_ACK_THRESHOLD: u32 = 3;

/// The Reno state machine. Owned by the sender session and driven entirely
/// by three events: new cumulative ack, duplicate ack, retransmission
/// timeout.
#[derive(Debug)]
pub struct RenoController {
    state: CongestionState,
    cwnd: f64,
    ssthresh: f64,
    duplicate_acks: u32,
}

impl RenoController {
    pub fn new() -> Self {
        RenoController {
            state: CongestionState::SlowStart,
            cwnd: INITIAL_CWND,
            ssthresh: INITIAL_SSTHRESH,
            duplicate_acks: 0,
        }
    }

    pub fn state(&self) -> CongestionState {
        self.state
    }

    /// Congestion window in packets. Never below 1.
    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    /// Slow-start threshold in packets. Never below 2.
    pub fn ssthresh(&self) -> f64 {
        self.ssthresh
    }

    pub fn duplicate_acks(&self) -> u32 {
        self.duplicate_acks
    }

    /// How many packets may be outstanding right now, under both the fixed
    /// flow-control cap and the congestion window.
    pub fn allowance(&self, flow_window: usize) -> usize {
        (flow_window as f64).min(self.cwnd).floor() as usize
    }

    /// A cumulative ack advanced the window base.
    pub fn on_new_ack(&mut self) {
        self.duplicate_acks = 0;
        match self.state {
            CongestionState::SlowStart => {
                self.cwnd += 1.0;
                if self.cwnd >= self.ssthresh {
                    self.state = CongestionState::CongestionAvoidance;
                }
            }
            CongestionState::CongestionAvoidance => {
                self.cwnd += 1.0 / self.cwnd;
            }
            CongestionState::FastRecovery => {
                self.cwnd = self.ssthresh;
                self.state = CongestionState::CongestionAvoidance;
            }
        }
    }

    /// A stale ack arrived. Returns true exactly when the third consecutive
    /// duplicate fires the fast-retransmit signal; duplicates during fast
    /// recovery only inflate the window.
    #[must_use]
    pub fn on_duplicate_ack(&mut self) -> bool {
        self.duplicate_acks += 1;
        if self.state == CongestionState::FastRecovery {
            self.cwnd += 1.0;
            return false;
        }
        if self.duplicate_acks == DUP_ACK_THRESHOLD {
            self.ssthresh = (self.cwnd / 2.0).max(MIN_SSTHRESH);
            self.cwnd = self.ssthresh + DUP_ACK_THRESHOLD as f64;
            self.state = CongestionState::FastRecovery;
            return true;
        }
        false
    }

    /// An outstanding packet aged past the retransmission timeout. Applied
    /// once per overdue packet found in a scan, not once per scan.
    pub fn on_timeout(&mut self) {
        self.ssthresh = (self.cwnd / 2.0).max(MIN_SSTHRESH);
        self.cwnd = 1.0;
        self.duplicate_acks = 0;
        self.state = CongestionState::SlowStart;
    }
}

impl Default for RenoController {
    fn default() -> Self {
        Self::new()
    }
}

//! Sender-side sliding window bookkeeping.
//!
//! Pure state, no sockets: the window loop in [`crate::sender`] decides when
//! to transmit; this module only tracks what is outstanding. Keyed by
//! sequence number so cumulative eviction is a single ordered-map split.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::packet::Packet;

/// One outstanding, unacknowledged packet. The timestamp is refreshed on
/// every retransmission so the timeout scan measures the latest attempt.
#[derive(Debug, Clone)]
pub struct PacketState {
    pub packet: Packet,
    pub sent_at: Instant,
}

/// The sliding window. No key is ever below `send_base`; sequence numbers
/// are handed out contiguously from `next_seq`, starting at 1 (0 belongs to
/// the handshake probe).
#[derive(Debug)]
pub struct SendWindow {
    base: u32,
    next_seq: u32,
    outstanding: BTreeMap<u32, PacketState>,
}

impl SendWindow {
    pub fn new() -> Self {
        SendWindow {
            base: 1,
            next_seq: 1,
            outstanding: BTreeMap::new(),
        }
    }

    /// Oldest unacknowledged sequence number. Monotonically non-decreasing.
    pub fn send_base(&self) -> u32 {
        self.base
    }

    /// Sequence number the next admitted packet will get.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    pub fn get_mut(&mut self, seq: u32) -> Option<&mut PacketState> {
        self.outstanding.get_mut(&seq)
    }

    /// Build a data packet for `payload` under the next sequence number and
    /// track it as outstanding. Returns the stored state for transmission.
    pub fn admit(&mut self, window_size: u16, payload: Vec<u8>) -> &PacketState {
        let seq = self.next_seq;
        self.next_seq += 1;
        let packet = Packet::data(seq, window_size, payload);
        self.outstanding.entry(seq).or_insert(PacketState {
            packet,
            sent_at: Instant::now(),
        })
    }

    /// Evict everything a cumulative ack covers and advance the base to
    /// `ack + 1`. Acks behind the base leave the window untouched. Returns
    /// the number of entries released.
    pub fn acknowledge(&mut self, ack: u32) -> usize {
        if ack < self.base {
            return 0;
        }
        let keep = self.outstanding.split_off(&(ack + 1));
        let released = self.outstanding.len();
        self.outstanding = keep;
        self.base = ack + 1;
        released
    }

    /// Sequence numbers whose last transmission is at least `timeout` old.
    pub fn overdue(&self, timeout: Duration) -> Vec<u32> {
        self.outstanding
            .iter()
            .filter(|(_, state)| state.sent_at.elapsed() >= timeout)
            .map(|(seq, _)| *seq)
            .collect()
    }
}

impl Default for SendWindow {
    fn default() -> Self {
        Self::new()
    }
}

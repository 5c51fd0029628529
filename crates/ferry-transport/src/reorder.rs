//! Receiver-side reordering and contiguous delivery.
//!
//! The buffer owns the `expected_seq_num` cursor. Only a packet matching the
//! cursor reaches storage; anything ahead of it is parked, and the cursor
//! advances one sequence at a time as gaps fill. The cumulative ack the
//! receive loop sends back is always `expected - 1`, the highest sequence
//! delivered with nothing missing before it.

use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::packet::Packet;

/// What became of an accepted data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// In order. `packets` and `bytes` cover this packet plus any buffered
    /// ones that became contiguous and were drained behind it.
    Delivered { packets: u32, bytes: usize },
    /// Ahead of the cursor, parked until the gap fills.
    Buffered,
    /// Behind the cursor; storage is never touched again for it.
    Duplicate,
}

/// Out-of-order holding area plus the delivery cursor.
#[derive(Debug)]
pub struct ReorderBuffer {
    expected: u32,
    pending: BTreeMap<u32, Packet>,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        ReorderBuffer {
            expected: 1,
            pending: BTreeMap::new(),
        }
    }

    /// Sequence number the next in-order packet must carry.
    pub fn expected_seq(&self) -> u32 {
        self.expected
    }

    /// Cumulative acknowledgment value: highest sequence delivered with no
    /// gap before it. Zero until the first packet lands.
    pub fn cumulative_ack(&self) -> u32 {
        self.expected - 1
    }

    /// Packets parked ahead of the cursor.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Classify one checksum-valid data packet and write whatever became
    /// deliverable to `sink`. A packet re-sent for a sequence already parked
    /// overwrites the parked copy.
    pub fn accept<W: Write>(&mut self, packet: Packet, sink: &mut W) -> io::Result<Arrival> {
        if packet.seq_num == self.expected {
            sink.write_all(&packet.payload)?;
            let mut bytes = packet.payload.len();
            let mut packets = 1;
            self.expected += 1;
            while let Some(next) = self.pending.remove(&self.expected) {
                sink.write_all(&next.payload)?;
                bytes += next.payload.len();
                packets += 1;
                self.expected += 1;
            }
            Ok(Arrival::Delivered { packets, bytes })
        } else if packet.seq_num > self.expected {
            self.pending.insert(packet.seq_num, packet);
            Ok(Arrival::Buffered)
        } else {
            Ok(Arrival::Duplicate)
        }
    }
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new()
    }
}

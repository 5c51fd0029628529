//! Transfer counters, shared between engine threads and the caller.
//! All fields are atomic so progress can be read without the session lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Client-side counters.
#[derive(Debug, Default)]
pub struct SenderStats {
    /// Unique data packets admitted to the window.
    pub packets_sent: AtomicU64,
    /// Timeout and fast retransmissions combined.
    pub retransmissions: AtomicU64,
    /// ACK-flagged, checksum-valid packets consumed.
    pub acks_received: AtomicU64,
    /// Unique payload bytes admitted (excludes retransmitted copies).
    pub bytes_sent: AtomicU64,
    /// Total file size, set once at the start of the transfer.
    pub bytes_total: AtomicU64,
}

impl SenderStats {
    pub fn set_total(&self, bytes: u64) {
        self.bytes_total.store(bytes, Ordering::Relaxed);
    }

    pub fn record_packet(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack(&self) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Progress as a fraction 0.0 - 1.0.
    pub fn progress(&self) -> f64 {
        let total = self.bytes_total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let sent = self.bytes_sent.load(Ordering::Relaxed);
        (sent as f64 / total as f64).min(1.0)
    }
}

/// Server-side counters.
#[derive(Debug, Default)]
pub struct ReceiverStats {
    /// Checksum-valid data packets received, in or out of order.
    pub packets_received: AtomicU64,
    /// Packets that arrived ahead of the cursor and had to be parked.
    pub out_of_order: AtomicU64,
    /// Payload bytes written to storage.
    pub bytes_written: AtomicU64,
}

impl ReceiverStats {
    pub fn record_packet(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_out_of_order(&self) {
        self.out_of_order.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }
}

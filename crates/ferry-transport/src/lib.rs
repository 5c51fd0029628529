//! Ferry: reliable file transfer over UDP.
//!
//! Rebuilds the TCP machinery the kernel normally hides, one datagram at a
//! time:
//! - 20-byte checksummed packet codec
//! - TCP-Reno congestion controller (slow start, congestion avoidance,
//!   fast recovery)
//! - Sliding-window sender with timeout and fast retransmit, acks consumed
//!   on a dedicated thread
//! - Reorder-buffer receiver answering every data packet with a cumulative
//!   ack
//! - Three-way handshake and single-FIN teardown

pub mod congestion;
pub mod handshake;
pub mod packet;
pub mod receiver;
pub mod reorder;
pub mod sender;
pub mod stats;
pub mod window;

// Re-export key types for convenience.
pub use congestion::{CongestionState, RenoController};
pub use handshake::HandshakeError;
pub use packet::{Flags, Packet, PacketError, HEADER_LEN, MAX_DATAGRAM, MAX_PAYLOAD};
pub use receiver::{Receiver, ReceiverConfig, RecvError, RecvSummary};
pub use sender::{run_sender, SendError, SenderConfig, SendSummary};
pub use stats::{ReceiverStats, SenderStats};

/// Port the transfer server listens on.
pub const SERVER_PORT: u16 = 8888;

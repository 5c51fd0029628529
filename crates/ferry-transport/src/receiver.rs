//! Server-side transfer engine.
//!
//! Single-threaded: accept one handshake, then loop on the socket feeding a
//! reorder buffer that writes in-order payloads through to the output file.
//! Every data packet is answered with the current cumulative ack, so a lost
//! ack costs nothing and a gap produces the duplicate acks the sender's
//! fast-retransmit logic feeds on.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::handshake::{self, HandshakeError};
use crate::packet::{Flags, Packet, MAX_DATAGRAM};
use crate::reorder::{Arrival, ReorderBuffer};
use crate::stats::ReceiverStats;

/// Poll interval for the data loop. Bounds the lag of cancellation and of
/// the idle-timeout check.
const RECV_POLL: Duration = Duration::from_millis(50);

/// Send and receive buffer size requested for the UDP socket.
const SOCKET_BUFFER: usize = 1 << 20;

/// Tunables for one incoming transfer.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Local address to bind.
    pub bind: SocketAddr,
    /// File the received bytes are written to.
    pub output: PathBuf,
    /// Give up when nothing arrives for this long. `None` waits forever,
    /// which also covers the handshake wait.
    pub idle_timeout: Option<Duration>,
}

impl ReceiverConfig {
    pub fn new(bind: SocketAddr, output: PathBuf) -> Self {
        ReceiverConfig {
            bind,
            output,
            idle_timeout: None,
        }
    }
}

/// Final accounting for a completed transfer.
#[derive(Debug, Clone)]
pub struct RecvSummary {
    pub bytes: u64,
    pub packets: u64,
    pub out_of_order: u64,
    /// Highest sequence number delivered in order when the FIN arrived.
    pub delivered_through: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum RecvError {
    #[error("socket setup failed: {0}")]
    Socket(io::Error),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error("could not write {path}: {source}")]
    WriteFile { path: PathBuf, source: io::Error },
    #[error("no data received within the idle timeout")]
    IdleTimeout,
    #[error("transfer cancelled")]
    Cancelled,
}

/// One bound socket waiting for one transfer.
pub struct Receiver {
    config: ReceiverConfig,
    socket: UdpSocket,
}

impl Receiver {
    /// Bind the configured address with enlarged socket buffers.
    pub fn bind(config: ReceiverConfig) -> Result<Receiver, RecvError> {
        let socket = Socket::new(
            Domain::for_address(config.bind),
            Type::DGRAM,
            Some(Protocol::UDP),
        )
        .map_err(RecvError::Socket)?;
        socket
            .set_send_buffer_size(SOCKET_BUFFER)
            .map_err(RecvError::Socket)?;
        socket
            .set_recv_buffer_size(SOCKET_BUFFER)
            .map_err(RecvError::Socket)?;
        socket.bind(&config.bind.into()).map_err(RecvError::Socket)?;
        Ok(Receiver {
            config,
            socket: socket.into(),
        })
    }

    /// The actual bound address. Useful when binding port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Accept one handshake, receive one file, answer the FIN, and return.
    ///
    /// Cancellation is checked between datagrams once the handshake has
    /// completed; the handshake wait itself is bounded only by
    /// `idle_timeout`. Replies always go to the source address of the
    /// packet being answered.
    pub fn run(
        self,
        stats: Arc<ReceiverStats>,
        cancelled: Arc<AtomicBool>,
    ) -> Result<RecvSummary, RecvError> {
        info!(addr = %self.local_addr().map_err(RecvError::Socket)?, "waiting for a transfer");
        let peer = handshake::accept(&self.socket, self.config.idle_timeout)?;
        info!(%peer, "transfer starting");
        let started = Instant::now();

        let file = File::create(&self.config.output).map_err(|source| RecvError::WriteFile {
            path: self.config.output.clone(),
            source,
        })?;
        let mut sink = BufWriter::new(file);
        let mut buffer = ReorderBuffer::new();
        self.socket
            .set_read_timeout(Some(RECV_POLL))
            .map_err(RecvError::Socket)?;

        let mut buf = [0u8; MAX_DATAGRAM];
        let mut last_activity = Instant::now();
        loop {
            if cancelled.load(Ordering::Relaxed) {
                return Err(RecvError::Cancelled);
            }
            let (len, from) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    if let Some(idle) = self.config.idle_timeout {
                        if last_activity.elapsed() >= idle {
                            return Err(RecvError::IdleTimeout);
                        }
                    }
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "receive failed");
                    continue;
                }
            };
            last_activity = Instant::now();

            let packet = match Packet::decode(&buf[..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!(error = %e, "dropping undecodable datagram");
                    continue;
                }
            };
            // A corrupt packet is dropped without a reply; the sender's
            // timeout brings it back.
            if !packet.verify() {
                debug!(seq = packet.seq_num, "dropping corrupt packet");
                continue;
            }

            if packet.flags.contains(Flags::FIN) {
                let reply = Packet::control(Flags::ACK | Flags::FIN, 0, packet.seq_num + 1);
                if let Err(e) = self.socket.send_to(&reply.encode(), from) {
                    warn!(error = %e, "failed to acknowledge FIN");
                }
                debug!(seq = packet.seq_num, "FIN received");
                break;
            }

            stats.record_packet();
            let seq = packet.seq_num;
            let arrival = buffer
                .accept(packet, &mut sink)
                .map_err(|source| RecvError::WriteFile {
                    path: self.config.output.clone(),
                    source,
                })?;
            match arrival {
                Arrival::Delivered { packets, bytes } => {
                    stats.record_delivered(bytes as u64);
                    trace!(seq, packets, bytes, "delivered in order");
                }
                Arrival::Buffered => {
                    stats.record_out_of_order();
                    debug!(seq, expected = buffer.expected_seq(), "buffered out-of-order packet");
                }
                Arrival::Duplicate => {
                    trace!(seq, "duplicate packet");
                }
            }

            let ack = Packet::control(Flags::ACK, 0, buffer.cumulative_ack());
            if let Err(e) = self.socket.send_to(&ack.encode(), from) {
                warn!(ack = buffer.cumulative_ack(), error = %e, "failed to send ack");
            }
        }

        sink.flush().map_err(|source| RecvError::WriteFile {
            path: self.config.output.clone(),
            source,
        })?;
        let summary = RecvSummary {
            bytes: stats.bytes_written.load(Ordering::Relaxed),
            packets: stats.packets_received.load(Ordering::Relaxed),
            out_of_order: stats.out_of_order.load(Ordering::Relaxed),
            delivered_through: buffer.cumulative_ack(),
            elapsed: started.elapsed(),
        };
        info!(
            output = %self.config.output.display(),
            bytes = summary.bytes,
            packets = summary.packets,
            out_of_order = summary.out_of_order,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "transfer complete"
        );
        Ok(summary)
    }
}

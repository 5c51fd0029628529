//! Client-side transfer engine.
//!
//! Two threads share one session under one lock: the window loop (this
//! module's main loop) admits, retransmits, and paces packets; the ack
//! thread blocks on the socket and feeds window and congestion state. A
//! condvar wakes the window loop ahead of its tick when a fast retransmit
//! is signalled; shutdown is an explicit rendezvous over a completion flag,
//! a read timeout on the ack socket, and a join.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::congestion::RenoController;
use crate::handshake::{self, HandshakeError};
use crate::packet::{Flags, Packet, MAX_DATAGRAM, MAX_PAYLOAD};
use crate::stats::SenderStats;
use crate::window::SendWindow;

/// Outstanding-packet cap from flow control, independent of cwnd.
pub const DEFAULT_FLOW_WINDOW: usize = 64;

/// Age at which an unacknowledged packet is retransmitted.
pub const DEFAULT_RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Window-loop tick when no fast-retransmit wake arrives.
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Read timeout on the ack socket. Bounds how long shutdown can lag behind
/// the completion flag.
const ACK_POLL: Duration = Duration::from_millis(50);

/// Send and receive buffer size requested for the UDP socket.
const SOCKET_BUFFER: usize = 1 << 20;

/// Tunables for one outgoing transfer.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Server, or a relay in front of it, that the transfer is addressed to.
    pub remote: SocketAddr,
    /// File to send.
    pub file: PathBuf,
    /// Flow-control cap on outstanding packets.
    pub flow_window: usize,
    /// Age after which an unacknowledged packet is retransmitted.
    pub retransmit_timeout: Duration,
    /// Scheduling tick for the window loop.
    pub tick: Duration,
    /// Bound on the handshake wait. `None` waits forever; the protocol has
    /// no handshake retry either way.
    pub handshake_timeout: Option<Duration>,
}

impl SenderConfig {
    pub fn new(remote: SocketAddr, file: PathBuf) -> Self {
        SenderConfig {
            remote,
            file,
            flow_window: DEFAULT_FLOW_WINDOW,
            retransmit_timeout: DEFAULT_RETRANSMIT_TIMEOUT,
            tick: DEFAULT_TICK,
            handshake_timeout: None,
        }
    }
}

/// Final accounting for a completed transfer.
#[derive(Debug, Clone)]
pub struct SendSummary {
    pub bytes: u64,
    pub packets: u64,
    pub retransmissions: u64,
    pub acks: u64,
    pub elapsed: Duration,
}

impl SendSummary {
    /// Goodput in megabits per second.
    pub fn throughput_mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (self.bytes as f64 * 8.0) / (secs * 1_000_000.0)
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("could not read {path}: {source}")]
    ReadFile { path: PathBuf, source: io::Error },
    #[error("socket setup failed: {0}")]
    Socket(io::Error),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error("transfer cancelled")]
    Cancelled,
}

/// Window, congestion, and retransmit state shared by the two threads.
struct Session {
    window: SendWindow,
    reno: RenoController,
    /// At most one pending fast-retransmit target; a later trigger silently
    /// overwrites an unconsumed one.
    fast_retransmit: Option<u32>,
}

struct Shared {
    session: Mutex<Session>,
    /// Wakes the window loop ahead of its tick when a fast retransmit is
    /// posted.
    wake: Condvar,
}

/// Send one file to `config.remote` and block until every byte is
/// acknowledged and the FIN is on the wire.
///
/// `stats` is live while the transfer runs; `cancelled` aborts the transfer
/// at the next tick when set.
pub fn run_sender(
    config: &SenderConfig,
    stats: Arc<SenderStats>,
    cancelled: Arc<AtomicBool>,
) -> Result<SendSummary, SendError> {
    let data = std::fs::read(&config.file).map_err(|source| SendError::ReadFile {
        path: config.file.clone(),
        source,
    })?;
    stats.set_total(data.len() as u64);

    let socket = bind_socket(config.remote).map_err(SendError::Socket)?;
    info!(
        file = %config.file.display(),
        bytes = data.len(),
        remote = %config.remote,
        "starting transfer"
    );
    handshake::connect(&socket, config.remote, config.handshake_timeout)?;
    let started = Instant::now();

    let shared = Arc::new(Shared {
        session: Mutex::new(Session {
            window: SendWindow::new(),
            reno: RenoController::new(),
            fast_retransmit: None,
        }),
        wake: Condvar::new(),
    });
    let complete = Arc::new(AtomicBool::new(false));

    socket.set_read_timeout(Some(ACK_POLL)).map_err(SendError::Socket)?;
    let ack_socket = socket.try_clone().map_err(SendError::Socket)?;
    let ack_thread = thread::Builder::new()
        .name("ferry-acks".into())
        .spawn({
            let shared = Arc::clone(&shared);
            let stats = Arc::clone(&stats);
            let complete = Arc::clone(&complete);
            let cancelled = Arc::clone(&cancelled);
            move || ack_loop(&ack_socket, &shared, &stats, &complete, &cancelled)
        })
        .map_err(SendError::Socket)?;

    let outcome = window_loop(config, &socket, &data, &shared, &stats, &cancelled);

    complete.store(true, Ordering::Release);
    if ack_thread.join().is_err() {
        warn!("ack thread panicked");
    }
    outcome?;

    // One FIN, no retry, no waiting for the ACK|FIN to come back.
    let fin_seq = shared.session.lock().window.next_seq();
    let fin = Packet::control(Flags::FIN, fin_seq, 0);
    if let Err(e) = socket.send_to(&fin.encode(), config.remote) {
        warn!(error = %e, "failed to send FIN");
    }
    debug!(seq = fin_seq, "sent FIN");

    let summary = SendSummary {
        bytes: stats.bytes_sent.load(Ordering::Relaxed),
        packets: stats.packets_sent.load(Ordering::Relaxed),
        retransmissions: stats.retransmissions.load(Ordering::Relaxed),
        acks: stats.acks_received.load(Ordering::Relaxed),
        elapsed: started.elapsed(),
    };
    info!(
        bytes = summary.bytes,
        packets = summary.packets,
        retransmissions = summary.retransmissions,
        acks = summary.acks,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        mbps = summary.throughput_mbps(),
        "transfer complete"
    );
    Ok(summary)
}

/// The sender's scheduling loop. Every tick, in order: consume a pending
/// fast-retransmit signal, or failing that scan for overdue packets (the
/// congestion collapse applies once per overdue packet found); then admit
/// new data under `floor(min(flow_window, cwnd))`. Returns once all bytes
/// are admitted and the window has drained.
fn window_loop(
    config: &SenderConfig,
    socket: &UdpSocket,
    data: &[u8],
    shared: &Shared,
    stats: &SenderStats,
    cancelled: &AtomicBool,
) -> Result<(), SendError> {
    let mut offset = 0usize;
    let mut guard = shared.session.lock();
    loop {
        if cancelled.load(Ordering::Relaxed) {
            return Err(SendError::Cancelled);
        }
        let session = &mut *guard;

        if let Some(seq) = session.fast_retransmit.take() {
            // The signal may outlive its target if the ack beat us here.
            if let Some(state) = session.window.get_mut(seq) {
                transmit(socket, config.remote, &state.packet);
                state.sent_at = Instant::now();
                stats.record_retransmission();
                debug!(seq, "fast retransmit");
            }
        } else {
            for seq in session.window.overdue(config.retransmit_timeout) {
                if let Some(state) = session.window.get_mut(seq) {
                    transmit(socket, config.remote, &state.packet);
                    state.sent_at = Instant::now();
                }
                stats.record_retransmission();
                session.reno.on_timeout();
                warn!(seq, "retransmit on timeout");
            }
        }

        while offset < data.len()
            && session.window.len() < session.reno.allowance(config.flow_window)
        {
            let end = usize::min(offset + MAX_PAYLOAD, data.len());
            let state = session
                .window
                .admit(config.flow_window as u16, data[offset..end].to_vec());
            transmit(socket, config.remote, &state.packet);
            stats.record_packet(end - offset);
            trace!(
                seq = state.packet.seq_num,
                len = end - offset,
                cwnd = session.reno.cwnd(),
                "sent data packet"
            );
            offset = end;
        }

        if offset >= data.len() && session.window.is_empty() {
            return Ok(());
        }

        let _ = shared.wake.wait_for(&mut guard, config.tick);
    }
}

/// Consumes acks concurrently with the window loop. Exits when the transfer
/// is complete and the window has drained, or on cancellation; the read
/// timeout keeps both exits bounded.
fn ack_loop(
    socket: &UdpSocket,
    shared: &Shared,
    stats: &SenderStats,
    complete: &AtomicBool,
    cancelled: &AtomicBool,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        if cancelled.load(Ordering::Relaxed) {
            return;
        }
        if complete.load(Ordering::Acquire) && shared.session.lock().window.is_empty() {
            return;
        }

        let len = match socket.recv_from(&mut buf) {
            Ok((len, _)) => len,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                warn!(error = %e, "ack receive failed");
                continue;
            }
        };
        let packet = match Packet::decode(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(error = %e, "dropping undecodable datagram");
                continue;
            }
        };
        if !packet.verify() {
            debug!(ack = packet.ack_num, "dropping corrupt ack");
            continue;
        }
        if !packet.flags.contains(Flags::ACK) {
            trace!(flags = ?packet.flags, "ignoring non-ack packet");
            continue;
        }
        stats.record_ack();

        let mut guard = shared.session.lock();
        let session = &mut *guard;
        if packet.ack_num >= session.window.send_base() {
            let released = session.window.acknowledge(packet.ack_num);
            session.reno.on_new_ack();
            trace!(
                ack = packet.ack_num,
                released,
                cwnd = session.reno.cwnd(),
                "cumulative ack"
            );
        } else if session.reno.on_duplicate_ack() {
            session.fast_retransmit = Some(session.window.send_base());
            shared.wake.notify_one();
            debug!(seq = session.window.send_base(), "fast retransmit signalled");
        }
    }
}

/// Best-effort datagram send. A transient failure is logged and the packet
/// stays in the window for a later retransmission.
fn transmit(socket: &UdpSocket, remote: SocketAddr, packet: &Packet) {
    if let Err(e) = socket.send_to(&packet.encode(), remote) {
        warn!(seq = packet.seq_num, error = %e, "send failed");
    }
}

/// UDP socket with enlarged buffers, bound to an ephemeral port in the
/// remote's address family.
fn bind_socket(remote: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(remote), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_send_buffer_size(SOCKET_BUFFER)?;
    socket.set_recv_buffer_size(SOCKET_BUFFER)?;
    let bind_addr: SocketAddr = if remote.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    socket.bind(&bind_addr.into())?;
    Ok(socket.into())
}

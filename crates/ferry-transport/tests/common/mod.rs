//! Shared plumbing for the integration tests: temp files, a one-shot
//! receiver thread, and a UDP relay that can drop selected datagrams to
//! simulate a lossy path.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ferry_transport::packet::MAX_DATAGRAM;
use ferry_transport::{
    Flags, Packet, Receiver, ReceiverConfig, ReceiverStats, RecvError, RecvSummary,
};

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_transport=debug".into()),
        )
        .try_init();
}

pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ferry-{}-{}", std::process::id(), name))
}

/// Test payload with a known pattern. Prime modulus so packet boundaries
/// never line up with the pattern period.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Bind a receiver on an ephemeral loopback port and run it on its own
/// thread. The returned channel yields the transfer outcome.
pub fn spawn_receiver(
    output: PathBuf,
    idle_timeout: Duration,
) -> (
    SocketAddr,
    crossbeam_channel::Receiver<Result<RecvSummary, RecvError>>,
) {
    let mut config = ReceiverConfig::new("127.0.0.1:0".parse().unwrap(), output);
    config.idle_timeout = Some(idle_timeout);
    let receiver = Receiver::bind(config).unwrap();
    let addr = receiver.local_addr().unwrap();

    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::Builder::new()
        .name("test-server".into())
        .spawn(move || {
            let stats = Arc::new(ReceiverStats::default());
            let cancelled = Arc::new(AtomicBool::new(false));
            let _ = tx.send(receiver.run(stats, cancelled));
        })
        .unwrap();
    (addr, rx)
}

/// What the relay throws away.
pub enum DropPlan {
    /// Forward everything.
    None,
    /// Drop the first client-to-server transmission of each listed data
    /// sequence number. Retransmissions pass.
    DataOnce(Vec<u32>),
    /// Drop server-to-client pure acks for this long after the relay
    /// starts. Handshake and FIN replies carry more than the ACK flag and
    /// always pass.
    AcksFor(Duration),
}

/// UDP forwarder sitting between client and server, in the place the lab
/// router would occupy. Learns the client address from the first datagram
/// that does not come from the server.
pub struct Relay {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Relay {
    pub fn start(server: SocketAddr, plan: DropPlan) -> Relay {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let handle = thread::Builder::new()
            .name("test-relay".into())
            .spawn({
                let stop = Arc::clone(&stop);
                move || relay_loop(&socket, server, &plan, &stop)
            })
            .unwrap();
        Relay {
            addr,
            stop,
            handle: Some(handle),
        }
    }

    /// Address the client should send to instead of the server's.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn relay_loop(socket: &UdpSocket, server: SocketAddr, plan: &DropPlan, stop: &AtomicBool) {
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut client: Option<SocketAddr> = None;
    let mut already_dropped: HashSet<u32> = HashSet::new();
    let started = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(_) => continue,
        };
        let datagram = &buf[..len];
        if from == server {
            if drops_ack(plan, datagram, started) {
                continue;
            }
            if let Some(client) = client {
                let _ = socket.send_to(datagram, client);
            }
        } else {
            client = Some(from);
            if drops_data(plan, datagram, &mut already_dropped) {
                continue;
            }
            let _ = socket.send_to(datagram, server);
        }
    }
}

fn drops_data(plan: &DropPlan, datagram: &[u8], already_dropped: &mut HashSet<u32>) -> bool {
    let DropPlan::DataOnce(seqs) = plan else {
        return false;
    };
    let Ok(packet) = Packet::decode(datagram) else {
        return false;
    };
    packet.flags.is_empty()
        && !packet.payload.is_empty()
        && seqs.contains(&packet.seq_num)
        && already_dropped.insert(packet.seq_num)
}

fn drops_ack(plan: &DropPlan, datagram: &[u8], started: Instant) -> bool {
    let DropPlan::AcksFor(window) = plan else {
        return false;
    };
    if started.elapsed() >= *window {
        return false;
    }
    let Ok(packet) = Packet::decode(datagram) else {
        return false;
    };
    packet.flags == Flags::ACK && packet.payload.is_empty()
}

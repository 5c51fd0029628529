//! Connection establishment.
//!
//! Three-way, client-initiated: SYN (seq 0), SYN|ACK back, then a confirming
//! ACK the server never content-validates. Neither side retries; with no
//! timeout configured a lost handshake packet blocks its peer indefinitely,
//! and that is the protocol's documented default. Handshake packets are not
//! checksum-verified, only decoded.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::packet::{Flags, Packet, PacketError, MAX_DATAGRAM};

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("timed out waiting for the peer")]
    TimedOut,
    #[error("peer replied with unexpected flags {0:?}")]
    UnexpectedReply(Flags),
    #[error("peer sent an undecodable packet: {0}")]
    Malformed(#[from] PacketError),
}

/// Client side: send SYN, wait for SYN|ACK, confirm with an ACK carrying the
/// server's `seq_num + 1`. Returns as soon as the ACK is on the wire; the
/// server's receipt of it is never confirmed.
///
/// `timeout` of `None` waits forever on a lost reply.
pub fn connect(
    socket: &UdpSocket,
    remote: SocketAddr,
    timeout: Option<Duration>,
) -> Result<(), HandshakeError> {
    socket.set_read_timeout(timeout)?;

    let syn = Packet::control(Flags::SYN, 0, 0);
    socket.send_to(&syn.encode(), remote)?;
    debug!("sent SYN");

    let mut buf = [0u8; MAX_DATAGRAM];
    let (len, _) = recv_datagram(socket, &mut buf)?;
    let reply = Packet::decode(&buf[..len])?;
    let expected = Flags::SYN | Flags::ACK;
    if reply.flags != expected {
        return Err(HandshakeError::UnexpectedReply(reply.flags));
    }

    let confirm = Packet::control(Flags::ACK, 0, reply.seq_num + 1);
    socket.send_to(&confirm.encode(), remote)?;
    info!(peer = %remote, "connection established");
    Ok(())
}

/// Server side: wait for a SYN, answer SYN|ACK, then consume one more
/// datagram as the client's confirmation. That confirmation is not
/// content-validated; a data packet racing ahead of the ACK gets consumed
/// here and recovered later by the sender's retransmission timeout.
///
/// Returns the address the SYN came from.
pub fn accept(socket: &UdpSocket, timeout: Option<Duration>) -> Result<SocketAddr, HandshakeError> {
    socket.set_read_timeout(timeout)?;

    let mut buf = [0u8; MAX_DATAGRAM];
    let peer = loop {
        let (len, from) = recv_datagram(socket, &mut buf)?;
        match Packet::decode(&buf[..len]) {
            Ok(packet) if packet.flags.contains(Flags::SYN) => {
                let reply = Packet::control(Flags::SYN | Flags::ACK, 0, packet.seq_num + 1);
                socket.send_to(&reply.encode(), from)?;
                debug!(peer = %from, "sent SYN|ACK");
                break from;
            }
            Ok(packet) => {
                debug!(flags = ?packet.flags, "ignoring packet before SYN");
            }
            Err(e) => {
                debug!(error = %e, "ignoring undecodable datagram before SYN");
            }
        }
    };

    let (len, _) = recv_datagram(socket, &mut buf)?;
    match Packet::decode(&buf[..len]) {
        Ok(packet) => debug!(flags = ?packet.flags, "handshake confirmation consumed"),
        Err(e) => debug!(error = %e, "handshake confirmation undecodable, proceeding anyway"),
    }
    info!(peer = %peer, "connection established");
    Ok(peer)
}

fn recv_datagram(
    socket: &UdpSocket,
    buf: &mut [u8],
) -> Result<(usize, SocketAddr), HandshakeError> {
    match socket.recv_from(buf) {
        Ok(received) => Ok(received),
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            Err(HandshakeError::TimedOut)
        }
        Err(e) => Err(HandshakeError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::thread;

    fn loopback_socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").unwrap()
    }

    #[test]
    fn client_and_server_complete_the_exchange() {
        let server = loopback_socket();
        let server_addr = server.local_addr().unwrap();

        let acceptor = thread::spawn(move || accept(&server, Some(Duration::from_secs(5))));

        let client = loopback_socket();
        let client_addr = client.local_addr().unwrap();
        connect(&client, server_addr, Some(Duration::from_secs(5))).unwrap();

        let peer = acceptor.join().unwrap().unwrap();
        assert_eq!(peer, client_addr);
    }

    #[test]
    fn client_rejects_a_reply_without_syn_ack() {
        let fake_server = loopback_socket();
        let server_addr = fake_server.local_addr().unwrap();

        let responder = thread::spawn(move || {
            let mut buf = [0u8; MAX_DATAGRAM];
            let (_, from) = fake_server.recv_from(&mut buf).unwrap();
            let bogus = Packet::control(Flags::FIN, 0, 0);
            fake_server.send_to(&bogus.encode(), from).unwrap();
        });

        let client = loopback_socket();
        let err = connect(&client, server_addr, Some(Duration::from_secs(5))).unwrap_err();
        assert!(matches!(err, HandshakeError::UnexpectedReply(flags) if flags == Flags::FIN));
        responder.join().unwrap();
    }

    #[test]
    fn client_times_out_when_nobody_answers() {
        let silent = loopback_socket();
        let server_addr = silent.local_addr().unwrap();

        let client = loopback_socket();
        let err = connect(&client, server_addr, Some(Duration::from_millis(50))).unwrap_err();
        assert!(matches!(err, HandshakeError::TimedOut));
    }

    #[test]
    fn server_ignores_noise_before_the_syn() {
        let server = loopback_socket();
        let server_addr = server.local_addr().unwrap();

        let acceptor = thread::spawn(move || accept(&server, Some(Duration::from_secs(5))));

        let client = loopback_socket();
        client.send_to(b"junk", server_addr).unwrap();
        let stray = Packet::data(9, 64, vec![1, 2, 3]);
        client.send_to(&stray.encode(), server_addr).unwrap();
        connect(&client, server_addr, Some(Duration::from_secs(5))).unwrap();

        acceptor.join().unwrap().unwrap();
    }
}

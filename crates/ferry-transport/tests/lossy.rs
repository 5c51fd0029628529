//! Transfers through a relay that drops selected datagrams. Exercises
//! timeout retransmission, fast retransmit, the reorder buffer, and
//! cancellation under stall.

mod common;

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use ferry_transport::{run_sender, SendError, SenderConfig, SenderStats};

use common::{init_logging, patterned, spawn_receiver, temp_path, DropPlan, Relay};

/// Tightened timings so loss is recovered in test time, not protocol time.
fn fast_config(remote: SocketAddr, file: PathBuf) -> SenderConfig {
    let mut config = SenderConfig::new(remote, file);
    config.retransmit_timeout = Duration::from_millis(100);
    config.tick = Duration::from_millis(5);
    config.handshake_timeout = Some(Duration::from_secs(5));
    config
}

#[test]
fn a_lost_packet_is_recovered_by_timeout() {
    init_logging();
    let data = patterned(5000);
    let input = temp_path("lost-data-in");
    let output = temp_path("lost-data-out");
    fs::write(&input, &data).unwrap();

    let (server_addr, server) = spawn_receiver(output.clone(), Duration::from_secs(10));
    let relay = Relay::start(server_addr, DropPlan::DataOnce(vec![2]));

    let config = fast_config(relay.addr(), input.clone());
    let stats = Arc::new(SenderStats::default());
    let sent = run_sender(&config, stats, Arc::new(AtomicBool::new(false))).expect("sender failed");
    let received = server
        .recv_timeout(Duration::from_secs(20))
        .expect("receiver did not finish")
        .expect("receiver failed");

    assert_eq!(sent.packets, 4);
    assert!(sent.retransmissions >= 1, "the dropped packet was never resent");
    assert!(received.out_of_order >= 1, "nothing ever waited in the reorder buffer");
    assert_eq!(received.delivered_through, 4);
    assert_eq!(fs::read(&output).unwrap(), data, "file contents differ");

    let _ = fs::remove_file(&input);
    let _ = fs::remove_file(&output);
}

#[test]
fn a_drop_on_a_long_stream_is_recovered_in_flight() {
    init_logging();
    let data = patterned(200_000);
    let input = temp_path("fast-retransmit-in");
    let output = temp_path("fast-retransmit-out");
    fs::write(&input, &data).unwrap();

    let (server_addr, server) = spawn_receiver(output.clone(), Duration::from_secs(10));
    // Sequence 5 goes missing once the window is wide enough for the
    // packets behind it to produce three duplicate acks.
    let relay = Relay::start(server_addr, DropPlan::DataOnce(vec![5]));

    let config = fast_config(relay.addr(), input.clone());
    let stats = Arc::new(SenderStats::default());
    let sent = run_sender(&config, stats, Arc::new(AtomicBool::new(false))).expect("sender failed");
    let received = server
        .recv_timeout(Duration::from_secs(20))
        .expect("receiver did not finish")
        .expect("receiver failed");

    assert!(sent.retransmissions >= 1, "the dropped packet was never resent");
    assert!(received.out_of_order >= 1);
    assert_eq!(fs::read(&output).unwrap(), data, "file contents differ");

    let _ = fs::remove_file(&input);
    let _ = fs::remove_file(&output);
}

#[test]
fn withheld_acks_force_timeout_recovery() {
    init_logging();
    let data = patterned(20_000);
    let input = temp_path("no-acks-in");
    let output = temp_path("no-acks-out");
    fs::write(&input, &data).unwrap();

    let (server_addr, server) = spawn_receiver(output.clone(), Duration::from_secs(10));
    let relay = Relay::start(server_addr, DropPlan::AcksFor(Duration::from_millis(250)));

    let config = fast_config(relay.addr(), input.clone());
    let stats = Arc::new(SenderStats::default());
    let sent = run_sender(&config, stats, Arc::new(AtomicBool::new(false))).expect("sender failed");
    let received = server
        .recv_timeout(Duration::from_secs(20))
        .expect("receiver did not finish")
        .expect("receiver failed");

    assert!(sent.retransmissions >= 1, "silence should have forced a timeout");
    assert_eq!(received.delivered_through, 14);
    // Retransmitted packets reach the server as duplicates.
    assert!(received.packets >= 14);
    assert_eq!(fs::read(&output).unwrap(), data, "file contents differ");

    let _ = fs::remove_file(&input);
    let _ = fs::remove_file(&output);
}

#[test]
fn cancellation_interrupts_a_stalled_transfer() {
    init_logging();
    let data = patterned(20_000);
    let input = temp_path("cancel-in");
    let output = temp_path("cancel-out");
    fs::write(&input, &data).unwrap();

    let (server_addr, server) = spawn_receiver(output.clone(), Duration::from_secs(1));
    // Acks never come back, so the sender retransmits forever.
    let relay = Relay::start(server_addr, DropPlan::AcksFor(Duration::from_secs(3600)));

    let config = fast_config(relay.addr(), input.clone());
    let cancelled = Arc::new(AtomicBool::new(false));
    let sender = thread::spawn({
        let cancelled = Arc::clone(&cancelled);
        move || run_sender(&config, Arc::new(SenderStats::default()), cancelled)
    });

    thread::sleep(Duration::from_millis(300));
    cancelled.store(true, Ordering::Relaxed);
    let result = sender.join().expect("sender panicked");
    assert!(matches!(result, Err(SendError::Cancelled)));

    // With the client gone the server runs out its idle timeout.
    let server_result = server
        .recv_timeout(Duration::from_secs(20))
        .expect("receiver did not finish");
    assert!(server_result.is_err());

    let _ = fs::remove_file(&input);
    let _ = fs::remove_file(&output);
}

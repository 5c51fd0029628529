//! Receives one file over the ferry protocol and exits.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use ferry_transport::{Receiver, ReceiverConfig, ReceiverStats, SERVER_PORT};

fn main() -> anyhow::Result<()> {
    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_server=info,ferry_transport=info".into()),
        )
        .init();

    // No flags, no options. The output path is fixed.
    if std::env::args().len() != 1 {
        eprintln!("usage: ferry-server");
        std::process::exit(2);
    }

    let config = ReceiverConfig::new(
        SocketAddr::from(([0, 0, 0, 0], SERVER_PORT)),
        PathBuf::from("received_file"),
    );
    let receiver = Receiver::bind(config)?;
    let stats = Arc::new(ReceiverStats::default());
    let cancelled = Arc::new(AtomicBool::new(false));
    receiver.run(stats, cancelled)?;
    Ok(())
}

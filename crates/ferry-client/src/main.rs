//! Sends one file over the ferry protocol and exits.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use ferry_transport::{run_sender, SenderConfig, SenderStats};

fn main() -> anyhow::Result<()> {
    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_client=info,ferry_transport=info".into()),
        )
        .init();

    // The destination may be the server itself or a relay in front of it.
    let args: Vec<String> = std::env::args().collect();
    let (remote, file) = match args.len() {
        3 => {
            let remote: SocketAddr = args[1].parse()?;
            (remote, PathBuf::from(&args[2]))
        }
        _ => {
            eprintln!("usage: ferry-client <remote-addr> <file>");
            std::process::exit(2);
        }
    };

    let config = SenderConfig::new(remote, file);
    let stats = Arc::new(SenderStats::default());
    let cancelled = Arc::new(AtomicBool::new(false));
    run_sender(&config, stats, cancelled)?;
    Ok(())
}

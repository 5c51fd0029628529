//! TCP chat room server.
//!
//! A bare TCP listener. Each client's first line registers it in the room;
//! after that every message line is fanned out to everyone else through
//! per-client outbound channels, so one slow reader never stalls the room.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use ferry_chat::{parse_line, sys_line, ChatMessage, CHAT_PORT};

/// Capacity of per-client outbound channel.
const CLIENT_CHANNEL_CAPACITY: usize = 256;

/// Shared state for all chat connections.
#[derive(Clone)]
struct RoomState {
    inner: Arc<RoomInner>,
}

struct RoomInner {
    members: RwLock<HashMap<u64, mpsc::Sender<Bytes>>>,
    next_id: AtomicU64,
}

impl RoomState {
    fn new() -> Self {
        Self {
            inner: Arc::new(RoomInner {
                members: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Accept connections until the task is cancelled.
    async fn run(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("chat: new connection from {}", addr);
                    let state = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = state.handle_connection(stream).await {
                            warn!("chat: connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("chat: accept error: {}", e);
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> anyhow::Result<()> {
        stream.set_nodelay(true)?;
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        // The first line registers the client. Anything that is not a JOIN
        // still gets a seat, just an anonymous one.
        let name = match lines.next_line().await? {
            Some(line) => match parse_line(&line) {
                Some(ChatMessage::Join(name)) if !name.is_empty() => name,
                _ => "Unknown".to_string(),
            },
            None => return Ok(()),
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel::<Bytes>(CLIENT_CHANNEL_CAPACITY);
        let online = {
            let mut members = self.inner.members.write().await;
            members.insert(id, tx);
            members.len()
        };
        info!("chat: {} joined ({} online)", name, online);

        // Writer task: drains the outbound channel onto the socket.
        let write_handle = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        self.broadcast(Some(id), sys_line(&format!("{name} joined the chat.")))
            .await;

        let result = self.read_loop(&mut lines, id).await;

        write_handle.abort();
        {
            let mut members = self.inner.members.write().await;
            members.remove(&id);
        }
        self.broadcast(None, sys_line(&format!("{name} left the chat.")))
            .await;
        info!("chat: {} disconnected", name);

        result
    }

    /// Relay lines from one client to the rest of the room until it quits
    /// or disconnects. Anything that is not a QUIT is forwarded verbatim;
    /// the server never rewrites message content.
    async fn read_loop(
        &self,
        lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
        sender_id: u64,
    ) -> anyhow::Result<()> {
        while let Some(line) = lines.next_line().await? {
            if matches!(parse_line(&line), Some(ChatMessage::Quit(_))) {
                return Ok(());
            }
            self.broadcast(Some(sender_id), format!("{line}\n")).await;
        }
        Ok(())
    }

    /// Send one line to every member, skipping `except`. A full channel
    /// drops the line for that member rather than stalling the room.
    async fn broadcast(&self, except: Option<u64>, line: String) {
        let frame = Bytes::from(line);
        let members = self.inner.members.read().await;
        for (id, tx) in members.iter() {
            if Some(*id) == except {
                continue;
            }
            if let Err(e) = tx.try_send(frame.clone()) {
                match e {
                    mpsc::error::TrySendError::Full(_) => {
                        warn!("chat: channel full for member {}, dropping line", id);
                    }
                    mpsc::error::TrySendError::Closed(_) => {}
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_chat=info,ferry_chat_server=info".into()),
        )
        .init();

    let listener = TcpListener::bind(("0.0.0.0", CHAT_PORT)).await?;
    info!("chat server listening on 0.0.0.0:{}", CHAT_PORT);
    RoomState::new().run(listener).await;
    Ok(())
}

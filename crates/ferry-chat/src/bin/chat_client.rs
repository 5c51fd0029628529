//! Interactive chat client: one task prints the room, the main loop reads
//! stdin. `/quit` leaves cleanly.

use std::io::Write as _;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use ferry_chat::{join_line, msg_line, parse_line, quit_line, ChatMessage, CHAT_PORT};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("127.0.0.1:{CHAT_PORT}"));

    print!("Enter your nickname: ");
    std::io::stdout().flush()?;
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let name = match input.next_line().await? {
        Some(line) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                "Unknown".to_string()
            } else {
                trimmed
            }
        }
        None => return Ok(()),
    };

    let stream = TcpStream::connect(&addr).await?;
    stream.set_nodelay(true)?;
    let (reader, mut writer) = stream.into_split();
    writer.write_all(join_line(&name).as_bytes()).await?;
    println!("Connected to {addr}. Type /quit to leave.");

    // Print the room as it comes in.
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_line(&line) {
                    Some(ChatMessage::Sys(text)) => println!("[system] {text}"),
                    Some(ChatMessage::Msg { from, text }) => println!("[{from}]: {text}"),
                    _ => println!("{line}"),
                },
                Ok(None) | Err(_) => {
                    println!("[system] server closed the connection");
                    std::process::exit(0);
                }
            }
        }
    });

    while let Some(line) = input.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" {
            break;
        }
        writer.write_all(msg_line(&name, text).as_bytes()).await?;
    }

    // Covers both /quit and stdin EOF.
    let _ = writer.write_all(quit_line(&name).as_bytes()).await;
    Ok(())
}

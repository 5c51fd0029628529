//! Line-based chat protocol shared by the server and client binaries.
//!
//! One UTF-8 line per message, pipe-delimited:
//! `JOIN|name|`, `QUIT|name|`, `MSG|name|text`, `SYS|Server|text`.
//! Message text may itself contain pipes; only the first two are
//! delimiters.

/// Port the chat server listens on.
pub const CHAT_PORT: u16 = 8888;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    Join(String),
    Quit(String),
    Msg { from: String, text: String },
    Sys(String),
}

/// Parse one wire line. Returns `None` for anything that is not one of the
/// four known message kinds.
pub fn parse_line(line: &str) -> Option<ChatMessage> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut parts = line.splitn(3, '|');
    let kind = parts.next()?;
    let name = parts.next()?;
    let rest = parts.next().unwrap_or("");
    match kind {
        "JOIN" => Some(ChatMessage::Join(name.to_string())),
        "QUIT" => Some(ChatMessage::Quit(name.to_string())),
        "MSG" => Some(ChatMessage::Msg {
            from: name.to_string(),
            text: rest.to_string(),
        }),
        "SYS" => Some(ChatMessage::Sys(rest.to_string())),
        _ => None,
    }
}

pub fn join_line(name: &str) -> String {
    format!("JOIN|{name}|\n")
}

pub fn quit_line(name: &str) -> String {
    format!("QUIT|{name}|\n")
}

pub fn msg_line(name: &str, text: &str) -> String {
    format!("MSG|{name}|{text}\n")
}

pub fn sys_line(text: &str) -> String {
    format!("SYS|Server|{text}\n")
}

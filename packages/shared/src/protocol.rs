//! Control-channel grammar shared by the server and the client.
//!
//! Every control message is a single CRLF-terminated line. The server parses
//! each inbound line exactly once into a [`Command`]:
//!
//! ```text
//! line      = exit | upload | register | login | download | heartbeat | chat
//! exit      = "exit"
//! upload    = "upload" [ SP kind ]          ; kind defaults to File
//! kind      = "File" | "Audio"
//! register  = "Register" SP user SP pass    ; exactly two whitespace-free tokens
//! login     = "Login" SP user SP pass
//! download  = "download" SP target          ; attachment id or stored relative path
//! heartbeat = "[usage for heartbeat packet]"
//! chat      = any other line
//! ```
//!
//! Side-channel connections use a smaller grammar, see [`SideCommand`].

use std::{fmt, str::FromStr};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// Reserved sender name for admin broadcasts
pub const ADMIN: &str = "System";
/// Identity used by anonymous connections
pub const GUEST: &str = "Guest";
/// Liveness token sent periodically by clients
pub const HEARTBEAT: &str = "[usage for heartbeat packet]";
/// Line announcing that a binary frame follows on the same stream
pub const DOWNLOAD_MARKER: &str = "download";
/// Line terminator on the control channel
pub const LINE_END: &str = "\r\n";
/// Longest control line accepted, terminator excluded
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Line that ends a session, on either channel
pub const EXIT: &str = "exit";

const UPLOAD: &str = "upload";
const REGISTER: &str = "Register";
const LOGIN: &str = "Login";

/// Kind of payload carried by an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    File,
    Audio,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::File => "File",
            AttachmentKind::Audio => "Audio",
        }
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttachmentKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "File" => Ok(AttachmentKind::File),
            "Audio" => Ok(AttachmentKind::Audio),
            other => Err(ProtocolError::UnknownCommand(format!("upload {}", other))),
        }
    }
}

/// Username and password carried by `Register` and `Login`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// A parsed control-channel line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Upload(AttachmentKind),
    Register(Credentials),
    Login(Credentials),
    Download(String),
    Heartbeat,
    Chat(String),
}

/// A command keyword followed by arguments that do not fit its grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MalformedCommand {
    #[error("Register expects exactly a username and a password")]
    Register,
    #[error("Login expects exactly a username and a password")]
    Login,
    #[error("download expects a target")]
    Download,
}

impl Command {
    /// Classify one control line (terminator already stripped).
    pub fn parse(line: &str) -> Result<Command, MalformedCommand> {
        if line == EXIT {
            return Ok(Command::Exit);
        }
        if line == HEARTBEAT {
            return Ok(Command::Heartbeat);
        }

        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some(UPLOAD) => {
                let kind = match (tokens.next(), tokens.next()) {
                    (None, _) => Some(AttachmentKind::File),
                    (Some(kind), None) => kind.parse().ok(),
                    _ => None,
                };
                // "upload" followed by anything else is ordinary text.
                Ok(kind.map_or_else(|| Command::Chat(line.to_string()), Command::Upload))
            }
            Some(REGISTER) => credentials(tokens)
                .map(Command::Register)
                .ok_or(MalformedCommand::Register),
            Some(LOGIN) => credentials(tokens)
                .map(Command::Login)
                .ok_or(MalformedCommand::Login),
            Some(DOWNLOAD_MARKER) => {
                let target = line.trim_start()[DOWNLOAD_MARKER.len()..].trim();
                if target.is_empty() {
                    Err(MalformedCommand::Download)
                } else {
                    Ok(Command::Download(target.to_string()))
                }
            }
            _ => Ok(Command::Chat(line.to_string())),
        }
    }

    /// Render the command back into its wire line (terminator excluded).
    pub fn to_line(&self) -> String {
        match self {
            Command::Exit => EXIT.to_string(),
            Command::Upload(kind) => format!("{} {}", UPLOAD, kind),
            Command::Register(c) => format!("{} {} {}", REGISTER, c.username, c.password),
            Command::Login(c) => format!("{} {} {}", LOGIN, c.username, c.password),
            Command::Download(target) => format!("{} {}", DOWNLOAD_MARKER, target),
            Command::Heartbeat => HEARTBEAT.to_string(),
            Command::Chat(text) => text.clone(),
        }
    }
}

fn credentials<'a>(mut tokens: impl Iterator<Item = &'a str>) -> Option<Credentials> {
    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(username), Some(password), None) => Some(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }),
        _ => None,
    }
}

/// The command line of a one-shot side-channel connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideCommand {
    Upload(AttachmentKind),
    Download(u64),
}

impl SideCommand {
    pub fn parse(line: &str) -> Result<SideCommand, ProtocolError> {
        match Command::parse(line) {
            Ok(Command::Upload(kind)) => Ok(SideCommand::Upload(kind)),
            Ok(Command::Download(target)) => target
                .parse()
                .map(SideCommand::Download)
                .map_err(|_| ProtocolError::UnknownCommand(line.to_string())),
            _ => Err(ProtocolError::UnknownCommand(line.to_string())),
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            SideCommand::Upload(kind) => Command::Upload(*kind).to_line(),
            SideCommand::Download(id) => Command::Download(id.to_string()).to_line(),
        }
    }
}

/// Server replies to `Register` and `Login`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthReply {
    Verified,
    NotVerified,
    Duplicate,
    RegFail,
    RegSucc,
}

impl AuthReply {
    pub fn as_token(&self) -> &'static str {
        match self {
            AuthReply::Verified => "Verified",
            AuthReply::NotVerified => "NotVerified",
            AuthReply::Duplicate => "Duplicate",
            AuthReply::RegFail => "RegFail",
            AuthReply::RegSucc => "RegSucc",
        }
    }

    /// Recognize a reply token; any other line is not a reply.
    pub fn from_token(token: &str) -> Option<AuthReply> {
        match token {
            "Verified" => Some(AuthReply::Verified),
            "NotVerified" => Some(AuthReply::NotVerified),
            "Duplicate" => Some(AuthReply::Duplicate),
            "RegFail" => Some(AuthReply::RegFail),
            "RegSucc" => Some(AuthReply::RegSucc),
            _ => None,
        }
    }

    /// Whether this reply means the request succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, AuthReply::Verified | AuthReply::RegSucc)
    }
}

impl fmt::Display for AuthReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Render a broadcast line as delivered to peers and kept in history.
pub fn render_line(sender: &str, body: &str) -> String {
    format!("{}: {}", sender, body)
}

/// Read one control line.
///
/// Returns `Ok(None)` at end of stream. The CRLF (or bare LF) terminator is
/// stripped. Bytes that are not valid UTF-8 are replaced rather than rejected.
pub async fn read_line<R>(reader: &mut R) -> Result<Option<String>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut limited = AsyncReadExt::take(&mut *reader, MAX_LINE_LEN as u64 + 2);
    let n = limited.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if n as u64 == MAX_LINE_LEN as u64 + 2 {
        return Err(ProtocolError::LineTooLong(MAX_LINE_LEN));
    }
    if buf.len() > MAX_LINE_LEN {
        return Err(ProtocolError::LineTooLong(MAX_LINE_LEN));
    }

    let line = match String::from_utf8(buf) {
        Ok(line) => line,
        Err(e) => {
            tracing::debug!("Control line is not valid UTF-8, replacing invalid bytes");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    };
    Ok(Some(line))
}

/// Write one control line followed by CRLF and flush it.
pub async fn write_line<W>(writer: &mut W, line: &str) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = Vec::with_capacity(line.len() + LINE_END.len());
    bytes.extend_from_slice(line.as_bytes());
    bytes.extend_from_slice(LINE_END.as_bytes());
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

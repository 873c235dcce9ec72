//! Client protocol engine.
//!
//! A [`ChatClient`] owns the write half of a control connection and a
//! receiver task on the read half. The receiver classifies every inbound
//! line:
//!
//! - an auth reply token (`Verified`, `NotVerified`, `Duplicate`, `RegFail`,
//!   `RegSucc`) resolves the pending [`ChatClient::speak_and_await`] call;
//! - the `download` marker is followed by one binary frame, received inline
//!   into the download directory;
//! - anything else is a chat line for the presentation layer.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use parlor_shared::{
    frame::{copy_payload, write_header},
    protocol::{
        AttachmentKind, AuthReply, Command, Credentials, DOWNLOAD_MARKER, EXIT, GUEST, HEARTBEAT,
        read_line, write_line,
    },
};
use tokio::{
    io::{AsyncWriteExt, BufReader, ReadHalf, WriteHalf},
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};

use crate::{
    error::ClientError,
    transfer::{open_upload, receive_file},
    transport::{BoxedStream, Link, Transport, UrgentProbe},
};

/// Upper bound on the join handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `disconnect` waits for the server to close after `exit`
const DISCONNECT_WAIT: Duration = Duration::from_secs(1);

/// What the receiver task hands to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Chat(String),
    Reply(AuthReply),
    Downloaded { path: PathBuf, length: u64 },
    DownloadFailed(String),
    Closed,
}

pub type EventStream = mpsc::UnboundedReceiver<ClientEvent>;

/// A joined control connection
pub struct ChatClient {
    username: String,
    room: String,
    writer: Mutex<WriteHalf<BoxedStream>>,
    urgent: Option<UrgentProbe>,
    replies: Mutex<watch::Receiver<Option<AuthReply>>>,
    closed: watch::Receiver<bool>,
    receiver: JoinHandle<()>,
}

impl ChatClient {
    /// Connect and join as `username`. Downloads land in `download_dir`.
    pub async fn connect(
        transport: &Transport,
        host: &str,
        port: u16,
        username: &str,
        download_dir: PathBuf,
    ) -> Result<(Self, EventStream), ClientError> {
        let link = transport.connect(host, port).await?;
        Self::join(link, username, download_dir).await
    }

    /// Run the join handshake over an open link: send the username, read the room name.
    pub async fn join(
        link: Link,
        username: &str,
        download_dir: PathBuf,
    ) -> Result<(Self, EventStream), ClientError> {
        let username = match username.trim() {
            "" => GUEST.to_string(),
            name => name.to_string(),
        };
        let (read_half, mut write_half) = tokio::io::split(link.stream);
        let mut reader = BufReader::new(read_half);

        write_line(&mut write_half, &username).await?;
        let room = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_line(&mut reader))
            .await
            .map_err(|_| ClientError::Timeout(HANDSHAKE_TIMEOUT))??
            .ok_or(ClientError::Closed)?;
        tracing::info!("Joined room '{}' as '{}'", room, username);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (replies_tx, replies_rx) = watch::channel(None);
        let (closed_tx, closed_rx) = watch::channel(false);
        let receiver = tokio::spawn(receive_loop(
            reader,
            download_dir,
            events_tx,
            replies_tx,
            closed_tx,
        ));

        let client = Self {
            username,
            room,
            writer: Mutex::new(write_half),
            urgent: link.urgent,
            replies: Mutex::new(replies_rx),
            closed: closed_rx,
            receiver,
        };
        Ok((client, events_rx))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Whether the receiver has seen the connection end
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Send one control line.
    pub async fn speak(&self, line: &str) -> Result<(), ClientError> {
        let mut writer = self.writer.lock().await;
        write_line(&mut *writer, line).await?;
        Ok(())
    }

    /// Send `line` and wait up to `wait` for the next auth reply.
    ///
    /// Calls are serialized, so each one observes the reply to its own line.
    pub async fn speak_and_await(&self, line: &str, wait: Duration) -> Result<AuthReply, ClientError> {
        let mut replies = self.replies.lock().await;
        replies.mark_unchanged();
        self.speak(line).await?;

        match tokio::time::timeout(wait, replies.changed()).await {
            Err(_) => Err(ClientError::Timeout(wait)),
            Ok(Err(_)) => Err(ClientError::Closed),
            Ok(Ok(())) => (*replies.borrow_and_update()).ok_or(ClientError::Closed),
        }
    }

    pub async fn login(&self, credentials: &Credentials, wait: Duration) -> Result<AuthReply, ClientError> {
        let line = Command::Login(credentials.clone()).to_line();
        self.speak_and_await(&line, wait).await
    }

    pub async fn register(
        &self,
        credentials: &Credentials,
        wait: Duration,
    ) -> Result<AuthReply, ClientError> {
        let line = Command::Register(credentials.clone()).to_line();
        self.speak_and_await(&line, wait).await
    }

    /// Upload a file over the control connection itself.
    ///
    /// The writer stays locked for the whole frame so no other line can
    /// interleave with the payload.
    pub async fn upload(&self, path: &Path, kind: AttachmentKind) -> Result<u64, ClientError> {
        let (header, mut file) = open_upload(path).await?;
        let mut writer = self.writer.lock().await;
        write_line(&mut *writer, &Command::Upload(kind).to_line()).await?;
        write_header(&mut *writer, &header).await?;
        let sent = copy_payload(&mut file, &mut *writer, header.length).await?;
        tracing::info!("Uploaded '{}' ({} bytes)", header.file_name, sent);
        Ok(sent)
    }

    /// Ask for a download on the control connection. The file arrives as a
    /// [`ClientEvent::Downloaded`] event.
    pub async fn request_download(&self, target: &str) -> Result<(), ClientError> {
        self.speak(&Command::Download(target.to_string()).to_line())
            .await
    }

    /// One heartbeat: the liveness token, then the urgent byte on plain TCP.
    pub async fn heartbeat(&self) -> Result<(), ClientError> {
        self.speak(HEARTBEAT).await?;
        if let Some(probe) = &self.urgent {
            probe.send()?;
        }
        Ok(())
    }

    /// Say `exit`, give the server a moment to close, then shut the stream down.
    pub async fn disconnect(&self) {
        let _ = self.speak(EXIT).await;
        let mut closed = self.closed.clone();
        let _ = tokio::time::timeout(DISCONNECT_WAIT, closed.wait_for(|closed| *closed)).await;
        let _ = self.writer.lock().await.shutdown().await;
        tracing::debug!("Disconnected from '{}'", self.room);
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

async fn receive_loop(
    mut reader: BufReader<ReadHalf<BoxedStream>>,
    download_dir: PathBuf,
    events: mpsc::UnboundedSender<ClientEvent>,
    replies: watch::Sender<Option<AuthReply>>,
    closed: watch::Sender<bool>,
) {
    loop {
        let line = match read_line(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                if !e.is_disconnect() {
                    tracing::warn!("Failed to read from server: {}", e);
                }
                break;
            }
        };

        if let Some(reply) = AuthReply::from_token(&line) {
            replies.send_replace(Some(reply));
            let _ = events.send(ClientEvent::Reply(reply));
        } else if line == DOWNLOAD_MARKER {
            match receive_file(&mut reader, &download_dir).await {
                Ok((path, length)) => {
                    tracing::info!("Saved {} ({} bytes)", path.display(), length);
                    let _ = events.send(ClientEvent::Downloaded { path, length });
                }
                Err(ClientError::Io(e)) => {
                    tracing::warn!("Failed to save download: {}", e);
                    let _ = events.send(ClientEvent::DownloadFailed(e.to_string()));
                }
                Err(e) => {
                    tracing::warn!("Download interrupted: {}", e);
                    break;
                }
            }
        } else {
            let _ = events.send(ClientEvent::Chat(line));
        }
    }

    closed.send_replace(true);
    let _ = events.send(ClientEvent::Closed);
}

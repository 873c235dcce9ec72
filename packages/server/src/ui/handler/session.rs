//! Control-channel session handler.
//!
//! One task per control connection, moving through
//! `Connecting -> Active -> Closing -> Closed`:
//!
//! - **Connecting**: read the username line (empty means `Guest`), queue the
//!   room name as the first outbound line, then join the registry.
//! - **Active**: classify each line as a [`Command`] and dispatch it, while the
//!   heartbeat watchdog and the server's shutdown notice race the read loop.
//! - **Closing**: unregister, announce the departure when due, let the writer
//!   drain and shut the stream down.
//!
//! Every exit path, including errors mid-command, goes through the same
//! teardown.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use parlor_shared::protocol::{
    ADMIN, AuthReply, Command, DOWNLOAD_MARKER, GUEST, MalformedCommand, read_line, render_line,
};
use tokio::{
    io::{AsyncBufRead, AsyncRead, BufReader},
    sync::{mpsc, oneshot},
};

use crate::{
    heartbeat::HeartbeatMonitor,
    infrastructure::{Connection, Outbound, PusherChannel, transport::BoxedStream},
    ui::state::AppState,
    usecase::TransferError,
};

use super::pusher::pusher_loop;

/// How long teardown waits for queued output to reach the peer
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a control-channel session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a session left the `Active` state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer sent `exit`
    Exit,
    /// The peer closed the stream
    PeerClosed,
    /// The heartbeat watchdog gave up on the peer
    TimedOut,
    /// An unexpected I/O or protocol fault
    Faulted(String),
    /// The server is shutting down
    Shutdown,
}

impl SessionEnd {
    /// Whether a named user's departure is announced to the room
    pub fn announces_departure(&self) -> bool {
        !matches!(self, SessionEnd::Shutdown)
    }
}

/// Serve one control connection until it ends.
pub async fn handle_control_connection(stream: BoxedStream, peer: SocketAddr, state: Arc<AppState>) {
    let address = peer.to_string();
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    tracing::debug!("Session '{}': {:?}", address, SessionState::Connecting);

    let username = match tokio::time::timeout(state.handshake_timeout(), read_line(&mut reader)).await {
        Ok(Ok(Some(line))) => username_from(&line),
        Ok(Ok(None)) => {
            tracing::debug!("'{}' closed before sending a username", address);
            return;
        }
        Ok(Err(e)) => {
            if !e.is_disconnect() {
                tracing::warn!("Handshake with '{}' failed: {}", address, e);
            }
            return;
        }
        Err(_) => {
            tracing::info!("'{}' sent no username in time", address);
            return;
        }
    };

    let heartbeat = HeartbeatMonitor::new(state.heartbeat);
    let (tx, rx) = mpsc::unbounded_channel();
    let mut writer = pusher_loop(rx, write_half, heartbeat.clone(), address.clone());
    let _ = tx.send(Outbound::Line(
        state.connect_participant_usecase.room_name().to_string(),
    ));

    let connection = Connection::new(username.clone(), tx.clone());
    let closer = connection.closer.clone();
    state
        .connect_participant_usecase
        .execute(address.clone(), connection)
        .await;

    let mut session = Session {
        address,
        username,
        state: SessionState::Connecting,
        outbound: tx,
        heartbeat,
        app: state,
    };
    session.transition(SessionState::Active);

    let watchdog = session.heartbeat.clone();
    let end = tokio::select! {
        end = session.drive(&mut reader) => end,
        _ = watchdog.expired() => SessionEnd::TimedOut,
        _ = closer.notified() => SessionEnd::Shutdown,
    };

    session.transition(SessionState::Closing);
    match &end {
        SessionEnd::Faulted(reason) => {
            tracing::error!("Session '{}' failed: {}", session.address, reason)
        }
        SessionEnd::TimedOut => {
            tracing::info!("Session '{}' timed out", session.address)
        }
        other => tracing::debug!("Session '{}' ended: {:?}", session.address, other),
    }
    let address = session.address.clone();
    session.teardown(&end).await;

    // Every sender is gone now, so the writer finishes the queue and shuts down.
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
    drop(reader);
    tracing::debug!("Session '{}': {:?}", address, SessionState::Closed);
}

fn username_from(line: &str) -> String {
    let name = line.trim();
    if name.is_empty() {
        GUEST.to_string()
    } else {
        name.to_string()
    }
}

struct Session {
    address: String,
    /// Bound at handshake, never changes
    username: String,
    state: SessionState,
    outbound: PusherChannel,
    heartbeat: HeartbeatMonitor,
    app: Arc<AppState>,
}

impl Session {
    fn transition(&mut self, next: SessionState) {
        tracing::debug!(
            "Session '{}' ({}): {:?} -> {:?}",
            self.address,
            self.username,
            self.state,
            next
        );
        self.state = next;
    }

    async fn drive<R>(&self, reader: &mut R) -> SessionEnd
    where
        R: AsyncBufRead + AsyncRead + Unpin,
    {
        loop {
            let line = match read_line(reader).await {
                Ok(Some(line)) => line,
                Ok(None) => return SessionEnd::PeerClosed,
                Err(e) if e.is_disconnect() => return SessionEnd::PeerClosed,
                Err(e) => return SessionEnd::Faulted(e.to_string()),
            };
            self.heartbeat.record_activity();

            let command = match Command::parse(&line) {
                Ok(command) => command,
                Err(malformed) => {
                    self.reject(malformed);
                    continue;
                }
            };
            if let Some(end) = self.dispatch(command, reader).await {
                return end;
            }
        }
    }

    async fn dispatch<R>(&self, command: Command, reader: &mut R) -> Option<SessionEnd>
    where
        R: AsyncRead + Unpin,
    {
        match command {
            Command::Exit => return Some(SessionEnd::Exit),
            Command::Heartbeat => {}
            Command::Chat(text) => {
                self.app
                    .send_message_usecase
                    .execute(&self.username, &text)
                    .await;
            }
            Command::Register(credentials) => {
                let reply = self.app.register_user_usecase.execute(&credentials).await;
                self.reply(reply);
            }
            Command::Login(credentials) => {
                let reply = self.app.login_user_usecase.execute(&credentials).await;
                self.reply(reply);
            }
            Command::Upload(kind) => {
                let mut tracked = self.heartbeat.progress(reader);
                let result = self
                    .app
                    .transfer_file_usecase
                    .receive_upload(&mut tracked, &self.username, kind)
                    .await;
                match result {
                    Ok(receipt) => tracing::info!(
                        "Stored '{}' ({} bytes) from '{}'",
                        receipt.file_name,
                        receipt.length,
                        self.username
                    ),
                    Err(e) if e.is_disconnect() => return Some(SessionEnd::PeerClosed),
                    Err(TransferError::Stream(e)) => return Some(SessionEnd::Faulted(e.to_string())),
                    Err(e) => {
                        tracing::warn!("Upload from '{}' failed: {}", self.username, e);
                        self.notice(&format!("Upload failed: {}", e));
                    }
                }
            }
            Command::Download(target) => self.download(&target).await,
        }
        None
    }

    async fn download(&self, target: &str) {
        let prepared = match self.app.transfer_file_usecase.prepare_download(target).await {
            Ok(prepared) => prepared,
            Err(TransferError::NotFound(_)) => {
                self.notice(&format!("File not found: {}", target));
                return;
            }
            Err(e) => {
                tracing::warn!("Download of '{}' failed: {}", target, e);
                self.notice(&format!("Download failed: {}", target));
                return;
            }
        };

        let source = prepared.source.clone();
        let (done_tx, done_rx) = oneshot::channel();
        let queued = self
            .outbound
            .send(Outbound::Line(DOWNLOAD_MARKER.to_string()))
            .and_then(|_| {
                self.outbound.send(Outbound::File {
                    source: prepared.source,
                    file: prepared.file,
                    done: done_tx,
                })
            });
        let result = match queued {
            Ok(()) => done_rx.await.ok(),
            Err(_) => None,
        };

        match result {
            Some(Ok(sent)) => {
                tracing::info!(
                    "Sent '{}' ({} bytes) to '{}'",
                    source.header.file_name,
                    sent,
                    self.username
                );
                self.app
                    .transfer_file_usecase
                    .announce_download(&self.username, &source)
                    .await;
            }
            Some(Err(e)) => tracing::warn!("Download to '{}' failed: {}", self.username, e),
            None => tracing::debug!("Writer for '{}' is gone", self.address),
        }
    }

    fn reject(&self, malformed: MalformedCommand) {
        tracing::debug!("Malformed command from '{}': {}", self.address, malformed);
        match malformed {
            MalformedCommand::Register => self.reply(AuthReply::RegFail),
            MalformedCommand::Login => self.reply(AuthReply::NotVerified),
            MalformedCommand::Download => {
                self.notice("Usage: download <attachment id | stored path>")
            }
        }
    }

    fn reply(&self, reply: AuthReply) {
        let _ = self
            .outbound
            .send(Outbound::Line(reply.as_token().to_string()));
    }

    /// A line for this peer only, in admin form.
    fn notice(&self, body: &str) {
        let _ = self.outbound.send(Outbound::Line(render_line(ADMIN, body)));
    }

    async fn teardown(self, end: &SessionEnd) {
        self.app
            .disconnect_participant_usecase
            .execute(&self.address, &self.username, end.announces_departure())
            .await;
    }
}

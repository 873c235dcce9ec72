//! One-shot side-channel handler.
//!
//! A side-channel connection carries exactly one transfer: an identity line,
//! a command line (`upload [File|Audio]` or `download <attachment-id>`), then
//! the binary frame in the direction the command implies. Side-channels are
//! never registered, so closing one is never announced. A transfer whose
//! payload stops moving is dropped by the same watchdog timing as a session.

use std::{net::SocketAddr, sync::Arc};

use parlor_shared::{
    ProtocolError,
    protocol::{
        ADMIN, DOWNLOAD_MARKER, EXIT, GUEST, SideCommand, read_line, render_line, write_line,
    },
};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{
    domain::AttachmentId,
    heartbeat::HeartbeatMonitor,
    infrastructure::transport::BoxedStream,
    ui::state::AppState,
    usecase::{TransferError, transfer_file::send_download},
};

/// Serve one side-channel transfer and close the connection.
pub async fn handle_side_connection(stream: BoxedStream, peer: SocketAddr, state: Arc<AppState>) {
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let opening = tokio::time::timeout(state.handshake_timeout(), read_opening(&mut reader)).await;
    match opening {
        Ok(Ok(Some((identity, command)))) => {
            let watchdog = HeartbeatMonitor::new(state.heartbeat);
            let mut tracked_reader = watchdog.progress(&mut reader);
            let mut tracked_writer = watchdog.progress(&mut writer);
            tokio::select! {
                _ = serve(&mut tracked_reader, &mut tracked_writer, &state, &identity, command) => {}
                _ = watchdog.expired() => {
                    tracing::info!("Side-channel transfer with '{}' stalled", peer)
                }
            }
        }
        Ok(Ok(None)) => tracing::debug!("Side-channel '{}' closed without a command", peer),
        Ok(Err(e)) => tracing::warn!("Side-channel '{}' rejected: {}", peer, e),
        Err(_) => tracing::info!("Side-channel '{}' sent no command in time", peer),
    }

    let _ = writer.shutdown().await;
    tracing::debug!("Side-channel '{}' closed", peer);
}

/// Identity and command lines; `None` when the peer leaves first or sends `exit`.
async fn read_opening<R>(
    reader: &mut R,
) -> Result<Option<(String, SideCommand)>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(identity) = read_line(reader).await? else {
        return Ok(None);
    };
    let Some(line) = read_line(reader).await? else {
        return Ok(None);
    };
    if line == EXIT {
        return Ok(None);
    }

    let identity = match identity.trim() {
        "" => GUEST.to_string(),
        name => name.to_string(),
    };
    Ok(Some((identity, SideCommand::parse(&line)?)))
}

async fn serve<R, W>(
    reader: &mut R,
    writer: &mut W,
    state: &AppState,
    identity: &str,
    command: SideCommand,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let transfers = &state.transfer_file_usecase;
    match command {
        SideCommand::Upload(kind) => match transfers.receive_upload(reader, identity, kind).await {
            Ok(receipt) => tracing::info!(
                "Stored '{}' ({} bytes) from '{}' via side-channel",
                receipt.file_name,
                receipt.length,
                identity
            ),
            Err(e) if e.is_disconnect() => {
                tracing::debug!("'{}' left during a side-channel upload", identity)
            }
            Err(e) => tracing::warn!("Side-channel upload from '{}' failed: {}", identity, e),
        },
        SideCommand::Download(id) => {
            let prepared = match transfers.prepare_attachment(AttachmentId::new(id)).await {
                Ok(prepared) => prepared,
                Err(e) => {
                    if !matches!(e, TransferError::NotFound(_)) {
                        tracing::warn!("Side-channel download of {} failed: {}", id, e);
                    }
                    let notice = render_line(ADMIN, &format!("Attachment {} not found", id));
                    let _ = write_line(writer, &notice).await;
                    return;
                }
            };

            let source = prepared.source;
            let sent = match write_line(writer, DOWNLOAD_MARKER).await {
                Ok(()) => send_download(writer, &source.header, prepared.file).await,
                Err(e) => Err(e),
            };
            match sent {
                Ok(sent) => {
                    tracing::info!(
                        "Sent attachment {} ({} bytes) to '{}' via side-channel",
                        id,
                        sent,
                        identity
                    );
                    transfers.announce_download(identity, &source).await;
                }
                Err(e) if e.is_disconnect() => {
                    tracing::debug!("'{}' left during a side-channel download", identity)
                }
                Err(e) => tracing::warn!("Side-channel download to '{}' failed: {}", identity, e),
            }
        }
    }
}

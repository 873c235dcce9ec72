//! Writer task owning the write half of a control connection.

use parlor_shared::protocol::write_line;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
};

use crate::{
    heartbeat::HeartbeatMonitor, infrastructure::Outbound, usecase::transfer_file::send_download,
};

/// Spawns a task that drains `rx` onto `writer`, in queue order.
///
/// Frame payload written to the peer counts as activity on `heartbeat`;
/// plain lines do not, since they flow whether or not the peer is alive.
/// The task stops at the first write failure, or once every sender is gone,
/// and then shuts the write direction down.
pub fn pusher_loop<W>(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut writer: W,
    heartbeat: HeartbeatMonitor,
    address: String,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let failure = match outbound {
                Outbound::Line(line) => write_line(&mut writer, &line)
                    .await
                    .err()
                    .map(|e| (e.is_disconnect(), e.to_string())),
                Outbound::File { source, file, done } => {
                    let mut tracked = heartbeat.progress(&mut writer);
                    let result = send_download(&mut tracked, &source.header, file).await;
                    let failure = result
                        .as_ref()
                        .err()
                        .map(|e| (e.is_disconnect(), e.to_string()));
                    let _ = done.send(result);
                    failure
                }
            };

            if let Some((disconnect, reason)) = failure {
                if disconnect {
                    tracing::debug!("Peer '{}' went away while writing", address);
                } else {
                    tracing::warn!("Failed to write to '{}': {}", address, reason);
                }
                break;
            }
        }

        let _ = writer.shutdown().await;
    })
}

//! Client-side heartbeat sender.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;

use crate::engine::ChatClient;

/// Default pause between heartbeats
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Send a heartbeat every `interval` until one fails.
///
/// The heartbeat is one-directional; nothing is awaited from the server.
/// A failed send, including the urgent byte, means the connection is lost.
pub fn spawn_heartbeat(client: Arc<ChatClient>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(e) = client.heartbeat().await {
                tracing::warn!("Heartbeat failed, connection lost: {}", e);
                break;
            }
            tracing::trace!("Heartbeat sent");
        }
    })
}

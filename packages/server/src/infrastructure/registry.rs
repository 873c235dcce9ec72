//! Connection registry and broadcast engine
//!
//! ## 責務
//!
//! - 接続中のコントロールチャネルを `"ip:port"` をキーに管理
//! - ブロードキャスト（永続化 → 履歴追加 → 全接続への送信）の直列化
//!
//! ## 設計ノート
//!
//! 各接続の書き込みは UI 層の `pusher_loop` タスクが担い、ここでは
//! `PusherChannel` にキューイングするだけです。ブロードキャストはレジストリの
//! ロックを保持したまま 3 段階すべてを行うため、全クライアントが同じ全順序で
//! 受信し、その順序は履歴と一致します。
//!
//! 応答しないピアがあってもロックは塞がりませんが、そのピアのキューは
//! 際限なく伸び続けます（既知のリスク）。ピアはここでは削除せず、
//! 自身のハートビート監視か次の読み込みエラーで回収されます。
//!
//! ロック順序: connections → history

use std::{collections::HashMap, sync::Arc};

use parlor_shared::{
    ProtocolError,
    protocol::{ADMIN, GUEST, render_line},
};
use tokio::sync::{Mutex, Notify, mpsc, oneshot};

use crate::domain::{AccountStore, DownloadSource, History, MessageId, RoomInfo, RoomStatus};

/// One unit of output for a connection's writer task
#[derive(Debug)]
pub enum Outbound {
    /// A control line, terminator excluded
    Line(String),
    /// A binary frame read from an already opened file; `done` receives the
    /// number of payload bytes sent
    File {
        source: DownloadSource,
        file: tokio::fs::File,
        done: oneshot::Sender<Result<u64, ProtocolError>>,
    },
}

pub type PusherChannel = mpsc::UnboundedSender<Outbound>;

/// A registered control-channel connection
#[derive(Debug, Clone)]
pub struct Connection {
    pub username: String,
    pub sender: PusherChannel,
    /// Notified to force the owning session into teardown
    pub closer: Arc<Notify>,
}

impl Connection {
    pub fn new(username: impl Into<String>, sender: PusherChannel) -> Self {
        Self {
            username: username.into(),
            sender,
            closer: Arc::new(Notify::new()),
        }
    }

    pub fn is_guest(&self) -> bool {
        self.username == GUEST
    }
}

pub struct ConnectionRegistry {
    room: RoomInfo,
    /// Key: peer address (`"ip:port"`)
    connections: Mutex<HashMap<String, Connection>>,
    history: Mutex<History>,
    accounts: Arc<dyn AccountStore>,
}

impl ConnectionRegistry {
    pub fn new(room: RoomInfo, history_capacity: usize, accounts: Arc<dyn AccountStore>) -> Self {
        Self {
            room,
            connections: Mutex::new(HashMap::new()),
            history: Mutex::new(History::new(history_capacity)),
            accounts,
        }
    }

    pub fn room(&self) -> &RoomInfo {
        &self.room
    }

    /// Add a connection. An existing entry for the same address is replaced.
    pub async fn register(&self, address: String, connection: Connection) {
        let mut connections = self.connections.lock().await;
        tracing::debug!(
            "Connection '{}' ({}) registered",
            address,
            connection.username
        );
        connections.insert(address, connection);
    }

    /// Announce a newcomer, then add it.
    ///
    /// Named users get a `Welcome <user>` admin broadcast that the newcomer
    /// itself does not receive. When `replay` is set the current history is
    /// queued to the newcomer first, in the same critical section, so it sees
    /// every line exactly once.
    pub async fn join(&self, address: String, connection: Connection, replay: bool) -> MessageId {
        let mut connections = self.connections.lock().await;

        if replay {
            for line in self.history.lock().await.snapshot() {
                let _ = connection.sender.send(Outbound::Line(line));
            }
        }

        let welcome = if connection.is_guest() {
            MessageId::INVALID
        } else {
            let body = format!("Welcome {}", connection.username);
            self.broadcast_locked(&connections, ADMIN, &body).await
        };

        tracing::debug!(
            "Connection '{}' ({}) joined",
            address,
            connection.username
        );
        connections.insert(address, connection);
        welcome
    }

    /// Remove a connection; `None` when it was already gone.
    pub async fn unregister(&self, address: &str) -> Option<Connection> {
        let removed = self.connections.lock().await.remove(address);
        if removed.is_some() {
            tracing::debug!("Connection '{}' unregistered", address);
        }
        removed
    }

    /// Persist, record and deliver one message to every registered connection.
    ///
    /// Returns the id assigned by the account store, or
    /// [`MessageId::INVALID`] when persistence failed.
    pub async fn broadcast(&self, sender: &str, body: &str) -> MessageId {
        let connections = self.connections.lock().await;
        self.broadcast_locked(&connections, sender, body).await
    }

    async fn broadcast_locked(
        &self,
        connections: &HashMap<String, Connection>,
        sender: &str,
        body: &str,
    ) -> MessageId {
        let id = match self.accounts.save_message(sender, body).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Failed to persist message from '{}': {}", sender, e);
                MessageId::INVALID
            }
        };

        let line = render_line(sender, body);
        self.history.lock().await.push(line.clone());

        for (address, connection) in connections.iter() {
            // ブロードキャストでは一部の送信失敗を許容
            if let Err(e) = connection.sender.send(Outbound::Line(line.clone())) {
                tracing::warn!("Failed to push message to '{}': {}", address, e);
            }
        }
        tracing::debug!(
            "Broadcasted message {} to {} connections",
            id,
            connections.len()
        );

        id
    }

    pub async fn current_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn contains(&self, address: &str) -> bool {
        self.connections.lock().await.contains_key(address)
    }

    pub async fn history(&self) -> Vec<String> {
        self.history.lock().await.snapshot()
    }

    pub async fn status(&self) -> RoomStatus {
        let connected = self.connections.lock().await.len();
        let history_len = self.history.lock().await.len();
        RoomStatus {
            name: self.room.name.clone(),
            port: self.room.port,
            connected,
            history_len,
        }
    }

    /// Force every registered session into teardown and clear the registry.
    ///
    /// Returns the number of connections that were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(String, Connection)> =
            self.connections.lock().await.drain().collect();
        for (address, connection) in &drained {
            tracing::debug!("Closing connection '{}'", address);
            connection.closer.notify_one();
        }
        drained.len()
    }
}

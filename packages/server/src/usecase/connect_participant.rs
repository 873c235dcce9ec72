//! UseCase: 参加者接続処理
//!
//! ハンドシェイク（ユーザー名を受信しルーム名を返す）が済んだ接続を
//! レジストリに登録します。

use std::sync::Arc;

use crate::{
    domain::RoomStatus,
    infrastructure::{Connection, ConnectionRegistry},
};

/// 参加者接続のユースケース
pub struct ConnectParticipantUseCase {
    registry: Arc<ConnectionRegistry>,
    /// 参加時に履歴を再送するか
    replay_history: bool,
}

impl ConnectParticipantUseCase {
    /// 新しい ConnectParticipantUseCase を作成
    pub fn new(registry: Arc<ConnectionRegistry>, replay_history: bool) -> Self {
        Self {
            registry,
            replay_history,
        }
    }

    /// ルーム名（ハンドシェイクの応答行）
    pub fn room_name(&self) -> &str {
        &self.registry.room().name
    }

    /// 参加者接続を実行
    ///
    /// # Returns
    ///
    /// 参加後のルームの状態
    pub async fn execute(&self, address: String, connection: Connection) -> RoomStatus {
        let username = connection.username.clone();
        self.registry
            .join(address.clone(), connection, self.replay_history)
            .await;
        let status = self.registry.status().await;
        tracing::info!("'{}' joined from {}; {}", username, address, status);
        status
    }
}

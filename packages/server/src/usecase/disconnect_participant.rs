//! UseCase: 参加者切断処理

use std::sync::Arc;

use parlor_shared::protocol::{ADMIN, GUEST};

use crate::infrastructure::ConnectionRegistry;

/// 参加者切断のユースケース
pub struct DisconnectParticipantUseCase {
    registry: Arc<ConnectionRegistry>,
}

impl DisconnectParticipantUseCase {
    /// 新しい DisconnectParticipantUseCase を作成
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// 参加者切断を実行
    ///
    /// # Arguments
    ///
    /// * `address` - 切断するコントロールチャネルの `"ip:port"`
    /// * `username` - 接続時に確定したユーザー名
    /// * `notify` - 退出通知を出すか（サーバー停止時は false）
    ///
    /// # Returns
    ///
    /// 退出通知をブロードキャストした場合 `true`
    pub async fn execute(&self, address: &str, username: &str, notify: bool) -> bool {
        // 既に close_all で取り除かれていれば通知しない
        let removed = self.registry.unregister(address).await.is_some();

        let announced = removed && notify && username != GUEST;
        if announced {
            self.registry
                .broadcast(ADMIN, &format!("User {} has left the chatroom.", username))
                .await;
        }

        let status = self.registry.status().await;
        tracing::info!("'{}' left from {}; {}", username, address, status);
        announced
    }
}

//! UseCase: メッセージ送信処理

use std::sync::Arc;

use crate::{domain::MessageId, infrastructure::ConnectionRegistry};

/// メッセージ送信のユースケース
pub struct SendMessageUseCase {
    registry: Arc<ConnectionRegistry>,
}

impl SendMessageUseCase {
    /// 新しい SendMessageUseCase を作成
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// チャット行を送信者名付きでブロードキャスト
    ///
    /// # Returns
    ///
    /// 永続化で払い出された ID（失敗時は [`MessageId::INVALID`]）
    pub async fn execute(&self, sender: &str, body: &str) -> MessageId {
        tracing::debug!("Chat from '{}': {}", sender, body);
        self.registry.broadcast(sender, body).await
    }
}

//! Account store trait 定義
//!
//! アカウント作成・認証、メッセージと添付ファイルの永続化を担う外部協調者の
//! インターフェースです。ハッシュ方式や保存先は実装側が決めます。

use std::path::Path;

use async_trait::async_trait;
use parlor_shared::protocol::AttachmentKind;
use thiserror::Error;

use super::{Attachment, AttachmentId, MessageId};

/// Failure modes of [`AccountStore::create_user`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreateUserError {
    #[error("user '{0}' already exists")]
    Duplicate(String),

    #[error("failed to create user: {0}")]
    Failed(String),
}

/// Persistence faults of the account store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("message {0} does not exist")]
    MessageNotFound(MessageId),

    #[error("attachment {0} does not exist")]
    AttachmentNotFound(AttachmentId),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Account Store trait
///
/// UseCase 層はこの trait に依存し、Infrastructure 層の具体的な実装には依存しない。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// 新しいユーザーを作成
    async fn create_user(&self, username: &str, password: &str) -> Result<(), CreateUserError>;

    /// ユーザー名とパスワードを照合
    async fn verify_user(&self, username: &str, password: &str) -> bool;

    /// メッセージを永続化し、払い出した ID を返す
    async fn save_message(&self, sender: &str, body: &str) -> Result<MessageId, StoreError>;

    /// 添付ファイルの記録を作成
    async fn save_attachment(
        &self,
        message_id: MessageId,
        file_name: &str,
        kind: AttachmentKind,
    ) -> Result<AttachmentId, StoreError>;

    /// 添付ファイルの保存先パスを更新
    async fn set_attachment_path(&self, id: AttachmentId, path: &Path) -> Result<(), StoreError>;

    /// 添付ファイルの記録を取得
    async fn find_attachment(&self, id: AttachmentId) -> Option<Attachment>;
}

//! InMemory Account Store 実装
//!
//! ドメイン層が定義する AccountStore trait の具体的な実装。
//! パスワードはユーザーごとのランダムな salt を付けた SHA-256 で保持します。

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use parlor_shared::{
    protocol::AttachmentKind,
    time::{Clock, SystemClock},
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::domain::{
    AccountStore, Attachment, AttachmentId, CreateUserError, MessageId, StoreError, StoredMessage,
};

const SALT_LEN: usize = 16;

#[derive(Debug, Clone)]
struct UserRecord {
    salt: String,
    password_hash: String,
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<String, UserRecord>,
    messages: Vec<StoredMessage>,
    attachments: HashMap<AttachmentId, Attachment>,
    next_attachment_id: u64,
}

/// インメモリ Account Store 実装
pub struct InMemoryAccountStore {
    tables: Mutex<Tables>,
    clock: Arc<dyn Clock>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            clock,
        }
    }

    /// 永続化されたメッセージの一覧を取得（ID 順）
    pub async fn messages(&self) -> Vec<StoredMessage> {
        self.tables.lock().await.messages.clone()
    }
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    hex::encode(salt)
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn create_user(&self, username: &str, password: &str) -> Result<(), CreateUserError> {
        if username.is_empty() || password.is_empty() {
            return Err(CreateUserError::Failed(
                "username and password must not be empty".to_string(),
            ));
        }

        let mut tables = self.tables.lock().await;
        if tables.users.contains_key(username) {
            return Err(CreateUserError::Duplicate(username.to_string()));
        }

        let salt = generate_salt();
        let password_hash = hash_password(&salt, password);
        tables.users.insert(
            username.to_string(),
            UserRecord {
                salt,
                password_hash,
            },
        );
        tracing::debug!("User '{}' created", username);
        Ok(())
    }

    async fn verify_user(&self, username: &str, password: &str) -> bool {
        let tables = self.tables.lock().await;
        match tables.users.get(username) {
            Some(record) => hash_password(&record.salt, password) == record.password_hash,
            None => false,
        }
    }

    async fn save_message(&self, sender: &str, body: &str) -> Result<MessageId, StoreError> {
        let mut tables = self.tables.lock().await;
        let id = MessageId::new(tables.messages.len() as i64 + 1);
        tables.messages.push(StoredMessage {
            id,
            sender: sender.to_string(),
            body: body.to_string(),
            sent_at: self.clock.now_millis(),
        });
        Ok(id)
    }

    async fn save_attachment(
        &self,
        message_id: MessageId,
        file_name: &str,
        kind: AttachmentKind,
    ) -> Result<AttachmentId, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.messages.iter().any(|m| m.id == message_id) {
            return Err(StoreError::MessageNotFound(message_id));
        }

        tables.next_attachment_id += 1;
        let id = AttachmentId::new(tables.next_attachment_id);
        tables.attachments.insert(
            id,
            Attachment {
                id,
                message_id,
                file_name: file_name.to_string(),
                kind,
                path: None,
            },
        );
        Ok(id)
    }

    async fn set_attachment_path(&self, id: AttachmentId, path: &Path) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let attachment = tables
            .attachments
            .get_mut(&id)
            .ok_or(StoreError::AttachmentNotFound(id))?;
        attachment.path = Some(PathBuf::from(path));
        Ok(())
    }

    async fn find_attachment(&self, id: AttachmentId) -> Option<Attachment> {
        self.tables.lock().await.attachments.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_shared::time::FixedClock;

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - ユーザー作成・認証（重複、パスワード不一致）
    // - メッセージ ID の払い出しと添付ファイルの紐付け
    //
    // 【なぜこのテストが必要か】
    // - Register / Login の応答トークンはこの結果に直接対応する
    // - 添付ファイルは永続化済みのメッセージ ID にのみ紐付けられる
    // ========================================

    #[tokio::test]
    async fn test_create_and_verify_user() {
        // テスト項目: 作成したユーザーが正しいパスワードでのみ認証される
        // given (前提条件):
        let store = InMemoryAccountStore::new();
        store.create_user("alice", "correctpw").await.unwrap();

        // when (操作):
        let ok = store.verify_user("alice", "correctpw").await;
        let wrong = store.verify_user("alice", "wrongpw").await;
        let unknown = store.verify_user("bob", "correctpw").await;

        // then (期待する結果):
        assert!(ok);
        assert!(!wrong);
        assert!(!unknown);
    }

    #[tokio::test]
    async fn test_create_duplicate_user() {
        // テスト項目: 既存ユーザー名での作成は Duplicate になる
        // given (前提条件):
        let store = InMemoryAccountStore::new();
        store.create_user("alice", "pw1").await.unwrap();

        // when (操作):
        let result = store.create_user("alice", "pw2").await;

        // then (期待する結果):
        assert_eq!(result, Err(CreateUserError::Duplicate("alice".to_string())));
        assert!(store.verify_user("alice", "pw1").await);
    }

    #[tokio::test]
    async fn test_create_user_with_empty_password_fails() {
        // テスト項目: 空のパスワードは Duplicate 以外の失敗になる
        // given (前提条件):
        let store = InMemoryAccountStore::new();

        // when (操作):
        let result = store.create_user("alice", "").await;

        // then (期待する結果):
        assert!(matches!(result, Err(CreateUserError::Failed(_))));
    }

    #[tokio::test]
    async fn test_message_ids_are_monotonic() {
        // テスト項目: メッセージ ID は 1 から単調増加で払い出される
        // given (前提条件):
        let store = InMemoryAccountStore::with_clock(Arc::new(FixedClock::new(1_000)));

        // when (操作):
        let first = store.save_message("alice", "hi").await.unwrap();
        let second = store.save_message("bob", "hello").await.unwrap();

        // then (期待する結果):
        assert_eq!(first, MessageId::new(1));
        assert_eq!(second, MessageId::new(2));
        let messages = store.messages().await;
        assert_eq!(messages[1].sender, "bob");
        assert_eq!(messages[1].sent_at, 1_000);
    }

    #[tokio::test]
    async fn test_attachment_requires_existing_message() {
        // テスト項目: 存在しないメッセージ ID への添付は拒否される
        // given (前提条件):
        let store = InMemoryAccountStore::new();

        // when (操作):
        let result = store
            .save_attachment(MessageId::INVALID, "a.txt", AttachmentKind::File)
            .await;

        // then (期待する結果):
        assert_eq!(result, Err(StoreError::MessageNotFound(MessageId::INVALID)));
    }

    #[tokio::test]
    async fn test_attachment_path_update() {
        // テスト項目: 添付ファイルの保存先パスを後から設定できる
        // given (前提条件):
        let store = InMemoryAccountStore::new();
        let message_id = store.save_message("System", "[File Name: a.txt]").await.unwrap();
        let id = store
            .save_attachment(message_id, "a.txt", AttachmentKind::File)
            .await
            .unwrap();

        // when (操作):
        store
            .set_attachment_path(id, Path::new("2024-01-01/attachment_1.txt"))
            .await
            .unwrap();

        // then (期待する結果):
        let attachment = store.find_attachment(id).await.unwrap();
        assert_eq!(attachment.message_id, message_id);
        assert_eq!(
            attachment.path,
            Some(PathBuf::from("2024-01-01/attachment_1.txt"))
        );
    }
}

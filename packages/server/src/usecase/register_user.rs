//! UseCase: ユーザー登録処理

use std::sync::Arc;

use parlor_shared::protocol::{ADMIN, AuthReply, Credentials};

use crate::{
    domain::{AccountStore, CreateUserError},
    infrastructure::ConnectionRegistry,
};

/// ユーザー登録のユースケース
pub struct RegisterUserUseCase {
    accounts: Arc<dyn AccountStore>,
    registry: Arc<ConnectionRegistry>,
}

impl RegisterUserUseCase {
    /// 新しい RegisterUserUseCase を作成
    pub fn new(accounts: Arc<dyn AccountStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { accounts, registry }
    }

    /// ユーザー登録を実行
    ///
    /// # Returns
    ///
    /// * `RegSucc` - 登録成功（全員に登録通知をブロードキャスト）
    /// * `Duplicate` - 同名のユーザーが既に存在
    /// * `RegFail` - その他の失敗
    pub async fn execute(&self, credentials: &Credentials) -> AuthReply {
        match self
            .accounts
            .create_user(&credentials.username, &credentials.password)
            .await
        {
            Ok(()) => {
                tracing::info!("User '{}' registered", credentials.username);
                self.registry
                    .broadcast(
                        ADMIN,
                        &format!(
                            "A new user {} has successfully registered!",
                            credentials.username
                        ),
                    )
                    .await;
                AuthReply::RegSucc
            }
            Err(CreateUserError::Duplicate(username)) => {
                tracing::debug!("Registration rejected, '{}' already exists", username);
                AuthReply::Duplicate
            }
            Err(e) => {
                tracing::warn!("Registration of '{}' failed: {}", credentials.username, e);
                AuthReply::RegFail
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{MockAccountStore, RoomInfo},
        infrastructure::InMemoryAccountStore,
    };

    fn creds(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn create_usecase(accounts: Arc<dyn AccountStore>) -> (RegisterUserUseCase, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new(
            RoomInfo::new("Lobby", 9000),
            10,
            Arc::new(InMemoryAccountStore::new()),
        ));
        (RegisterUserUseCase::new(accounts, registry.clone()), registry)
    }

    #[tokio::test]
    async fn test_register_success_broadcasts_notice() {
        // テスト項目: 登録成功で RegSucc を返し、登録通知がブロードキャストされる
        // given (前提条件):
        let (usecase, registry) = create_usecase(Arc::new(InMemoryAccountStore::new()));

        // when (操作):
        let reply = usecase.execute(&creds("alice", "pw")).await;

        // then (期待する結果):
        assert_eq!(reply, AuthReply::RegSucc);
        assert_eq!(
            registry.history().await,
            vec!["System: A new user alice has successfully registered!"]
        );
    }

    #[tokio::test]
    async fn test_register_duplicate() {
        // テスト項目: 既存ユーザー名での登録は Duplicate を返す
        // given (前提条件):
        let (usecase, registry) = create_usecase(Arc::new(InMemoryAccountStore::new()));
        usecase.execute(&creds("alice", "pw")).await;

        // when (操作):
        let reply = usecase.execute(&creds("alice", "anypw")).await;

        // then (期待する結果):
        assert_eq!(reply, AuthReply::Duplicate);
        assert_eq!(registry.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_register_store_failure() {
        // テスト項目: ストアの重複以外の失敗は RegFail になり、通知されない
        // given (前提条件):
        let mut store = MockAccountStore::new();
        store
            .expect_create_user()
            .returning(|_, _| Err(CreateUserError::Failed("connection lost".to_string())));
        let (usecase, registry) = create_usecase(Arc::new(store));

        // when (操作):
        let reply = usecase.execute(&creds("alice", "pw")).await;

        // then (期待する結果):
        assert_eq!(reply, AuthReply::RegFail);
        assert!(registry.history().await.is_empty());
    }
}

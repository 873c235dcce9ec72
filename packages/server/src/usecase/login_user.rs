//! UseCase: ログイン処理

use std::sync::Arc;

use parlor_shared::protocol::{AuthReply, Credentials};

use crate::domain::AccountStore;

/// ログインのユースケース
pub struct LoginUserUseCase {
    accounts: Arc<dyn AccountStore>,
}

impl LoginUserUseCase {
    /// 新しい LoginUserUseCase を作成
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }

    /// 資格情報を照合し、`Verified` か `NotVerified` を返す
    pub async fn execute(&self, credentials: &Credentials) -> AuthReply {
        if self
            .accounts
            .verify_user(&credentials.username, &credentials.password)
            .await
        {
            tracing::info!("User '{}' verified", credentials.username);
            AuthReply::Verified
        } else {
            tracing::debug!("User '{}' failed verification", credentials.username);
            AuthReply::NotVerified
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryAccountStore;

    #[tokio::test]
    async fn test_login_tokens() {
        // テスト項目: 正しいパスワードは Verified、誤ったパスワードは NotVerified
        // given (前提条件):
        let store = Arc::new(InMemoryAccountStore::new());
        store.create_user("alice", "correctpw").await.unwrap();
        let usecase = LoginUserUseCase::new(store);
        let attempt = |password: &str| Credentials {
            username: "alice".to_string(),
            password: password.to_string(),
        };

        // when (操作):
        let ok = usecase.execute(&attempt("correctpw")).await;
        let ng = usecase.execute(&attempt("wrongpw")).await;

        // then (期待する結果):
        assert_eq!(ok, AuthReply::Verified);
        assert_eq!(ng, AuthReply::NotVerified);
    }
}

//! Server state shared by every connection handler.

use std::{sync::Arc, time::Duration};

use crate::{
    heartbeat::HeartbeatConfig,
    usecase::{
        ConnectParticipantUseCase, DisconnectParticipantUseCase, LoginUserUseCase,
        RegisterUserUseCase, SendMessageUseCase, TransferFileUseCase,
    },
};

/// Shared application state
pub struct AppState {
    /// ConnectParticipantUseCase（参加者接続のユースケース）
    pub connect_participant_usecase: Arc<ConnectParticipantUseCase>,
    /// DisconnectParticipantUseCase（参加者切断のユースケース）
    pub disconnect_participant_usecase: Arc<DisconnectParticipantUseCase>,
    /// SendMessageUseCase（メッセージ送信のユースケース）
    pub send_message_usecase: Arc<SendMessageUseCase>,
    /// RegisterUserUseCase（ユーザー登録のユースケース）
    pub register_user_usecase: Arc<RegisterUserUseCase>,
    /// LoginUserUseCase（ログインのユースケース）
    pub login_user_usecase: Arc<LoginUserUseCase>,
    /// TransferFileUseCase（ファイル転送のユースケース）
    pub transfer_file_usecase: Arc<TransferFileUseCase>,
    /// セッションごとのハートビート監視設定
    pub heartbeat: HeartbeatConfig,
}

impl AppState {
    /// How long a new connection may take to send its opening lines
    pub fn handshake_timeout(&self) -> Duration {
        self.heartbeat.interval * self.heartbeat.max_misses
    }
}

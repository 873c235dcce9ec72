//! UseCase layer: one struct per operation a session can trigger.

pub mod connect_participant;
pub mod disconnect_participant;
pub mod error;
pub mod login_user;
pub mod register_user;
pub mod send_message;
pub mod transfer_file;

pub use connect_participant::ConnectParticipantUseCase;
pub use disconnect_participant::DisconnectParticipantUseCase;
pub use error::TransferError;
pub use login_user::LoginUserUseCase;
pub use register_user::RegisterUserUseCase;
pub use send_message::SendMessageUseCase;
pub use transfer_file::{TransferFileUseCase, UploadReceipt};

//! Domain layer: chat room models and the interfaces the server depends on.
//!
//! 具体的な実装（インメモリの account store、ファイル保存先など）は
//! Infrastructure 層が提供します（依存性の逆転）。

pub mod account;
pub mod history;
pub mod message;
pub mod room;

pub use account::{AccountStore, CreateUserError, StoreError};
#[cfg(test)]
pub use account::MockAccountStore;
pub use history::History;
pub use message::{Attachment, AttachmentId, DownloadSource, MessageId, StoredMessage};
pub use room::{RoomInfo, RoomStatus};

//! Message and attachment models.

use std::{fmt, path::PathBuf};

use parlor_shared::{frame::FrameHeader, protocol::AttachmentKind};

/// Identifier assigned to a message by the account store
///
/// Ids are only valid after successful persistence. [`MessageId::INVALID`]
/// marks a broadcast whose persistence failed; delivery still happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(i64);

impl MessageId {
    /// Sentinel returned when the message could not be persisted
    pub const INVALID: MessageId = MessageId(-1);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an attachment record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentId(u64);

impl AttachmentId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as kept by the account store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub sender: String,
    pub body: String,
    /// Unix timestamp (milliseconds)
    pub sent_at: i64,
}

/// A file or audio payload tied to a previously broadcast message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: AttachmentId,
    pub message_id: MessageId,
    pub file_name: String,
    pub kind: AttachmentKind,
    /// Permanent location, set once the bytes have been copied out of staging
    pub path: Option<PathBuf>,
}

/// A stored file ready to be streamed back to a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSource {
    pub header: FrameHeader,
    pub path: PathBuf,
}

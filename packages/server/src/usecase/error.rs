//! UseCase error types.

use std::io;

use parlor_shared::ProtocolError;
use thiserror::Error;

/// Failure of a single upload or download
///
/// None of these are fatal to the session that requested the transfer,
/// except a [`TransferError::Stream`] that reports a disconnect.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Reading or writing the peer's stream failed
    #[error("transfer stream failed: {0}")]
    Stream(#[from] ProtocolError),

    /// Local file I/O failed; the frame was fully consumed
    #[error("file storage failed: {0}")]
    Storage(#[source] io::Error),

    #[error("file not found: {0}")]
    NotFound(String),
}

impl TransferError {
    /// Whether the peer went away during the transfer
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransferError::Stream(e) if e.is_disconnect())
    }
}

//! Error types for the Parlor wire protocol.

use std::io;

use thiserror::Error;

/// Errors raised while reading or writing control lines and binary frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying transport failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A control line exceeded the maximum accepted length
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    /// A binary frame header could not be decoded or encoded
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The peer stopped sending before the declared length was reached
    #[error("stream ended after {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    /// Payload bytes were read but could not be written to their destination
    #[error("failed to write payload after consuming {consumed} bytes: {source}")]
    Sink {
        consumed: u64,
        #[source]
        source: io::Error,
    },

    /// A side-channel command line that matches no known command
    #[error("unknown side-channel command: '{0}'")]
    UnknownCommand(String),
}

impl ProtocolError {
    /// Whether this error is the peer going away rather than a fault.
    ///
    /// Abrupt disconnects are expected in a chat service and are not logged
    /// as errors.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Io(e) => is_disconnect(e),
            ProtocolError::Truncated { .. } => true,
            ProtocolError::Sink { source, .. } => is_disconnect(source),
            _ => false,
        }
    }
}

/// Classify an I/O error as an ordinary peer disconnect.
pub fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_and_truncation_are_disconnects() {
        // テスト項目: 接続リセットや途中切断は「想定内の切断」と判定される
        // given (前提条件):
        let reset = ProtocolError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        let truncated = ProtocolError::Truncated {
            received: 3,
            expected: 10,
        };

        // when (操作) / then (期待する結果):
        assert!(reset.is_disconnect());
        assert!(truncated.is_disconnect());
    }

    #[test]
    fn test_other_errors_are_not_disconnects() {
        // テスト項目: 権限エラーや不正フレームは切断として扱われない
        // given (前提条件):
        let denied = ProtocolError::Io(io::Error::from(io::ErrorKind::PermissionDenied));
        let invalid = ProtocolError::InvalidFrame("empty name".to_string());

        // when (操作) / then (期待する結果):
        assert!(!denied.is_disconnect());
        assert!(!invalid.is_disconnect());
    }
}

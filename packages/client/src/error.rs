//! Error types for the Parlor client.

use std::{io, time::Duration};

use parlor_shared::{ProtocolError, error::is_disconnect};
use thiserror::Error;

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Could not reach the server
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    /// The server closed the control connection
    #[error("Connection closed by server")]
    Closed,

    /// No reply arrived within the wait window
    #[error("No reply from server within {0:?}")]
    Timeout(Duration),

    /// The server answered a side-channel request with a notice instead of a file
    #[error("Server refused the transfer: {0}")]
    Refused(String),
}

impl ClientError {
    /// Whether the error means the control connection is gone
    pub fn is_connection_lost(&self) -> bool {
        match self {
            ClientError::Closed | ClientError::Connection(_) => true,
            ClientError::Io(e) => is_disconnect(e),
            ClientError::Protocol(e) => e.is_disconnect(),
            _ => false,
        }
    }
}

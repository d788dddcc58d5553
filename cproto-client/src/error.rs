//! Client error types.

use crate::config::ConfigError;
use cproto_protocol::ErrorCode;
use thiserror::Error;

/// Client errors.
///
/// Every call resolves either with an [`Answer`](crate::Answer) or with one
/// of these.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] cproto_protocol::ProtocolError),

    /// The peer could not be reached or the login did not complete in time.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The connection failed after it was established, or was terminated.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timeout")]
    Timeout,

    /// The completion slot for the call's sequence number is still occupied.
    #[error("connection busy: more than {capacity} calls in flight")]
    Busy { capacity: usize },

    #[error("server error: {code} - {message}")]
    Server { code: ErrorCode, message: String },

    #[error("synchronous call issued from the connection's I/O thread")]
    IoThreadCall,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::Busy { .. } => true,
            ClientError::ConnectFailed(_) => true,
            ClientError::ConnectionFailed(_) => true,
            ClientError::Server { code, .. } => code.is_retryable(),
            _ => false,
        }
    }

    /// Returns whether this error means the connection is unusable.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectFailed(_) | ClientError::ConnectionFailed(_)
        )
    }
}

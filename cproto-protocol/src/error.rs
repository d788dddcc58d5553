//! Protocol error types and server status codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or value decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid cproto magic: expected {expected:#010x}, got {actual:#010x}")]
    InvalidMagic { expected: u32, actual: u32 },

    #[error("unsupported protocol version: {0:#06x}")]
    UnsupportedVersion(u16),

    #[error("compressed frames are not supported")]
    CompressionUnsupported,

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("unknown command code: {0}")]
    UnknownCommand(u16),

    #[error("unknown status code: {0}")]
    UnknownStatus(i64),

    #[error("truncated payload: need {needed} more bytes")]
    Truncated { needed: usize },

    #[error("varint overflows 64 bits")]
    VarintOverflow,

    #[error("invalid value tag: {0}")]
    InvalidTag(u64),

    #[error("value nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("not enough arguments: expected at least {expected}, got {actual}")]
    NotEnoughArgs { expected: usize, actual: usize },

    #[error("invalid UTF-8 in status message")]
    InvalidUtf8,
}

/// Status codes carried in the first value of every response body.
///
/// These codes are part of the protocol contract and must remain stable
/// across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Ok,
    ParseSql,
    QueryExec,
    Params,
    Logic,
    ParseJson,
    ParseDsl,
    Conflict,
    ParseBin,
    Forbidden,
    WasRelock,
    NotValid,
    Network,
    NotFound,
    StateInvalidated,
    BadTransaction,
    OutdatedWal,
    NoWal,
    DataHashMismatch,
    Timeout,
    Canceled,
    TagsMismatch,
}

impl ErrorCode {
    const ALL: [ErrorCode; 22] = [
        ErrorCode::Ok,
        ErrorCode::ParseSql,
        ErrorCode::QueryExec,
        ErrorCode::Params,
        ErrorCode::Logic,
        ErrorCode::ParseJson,
        ErrorCode::ParseDsl,
        ErrorCode::Conflict,
        ErrorCode::ParseBin,
        ErrorCode::Forbidden,
        ErrorCode::WasRelock,
        ErrorCode::NotValid,
        ErrorCode::Network,
        ErrorCode::NotFound,
        ErrorCode::StateInvalidated,
        ErrorCode::BadTransaction,
        ErrorCode::OutdatedWal,
        ErrorCode::NoWal,
        ErrorCode::DataHashMismatch,
        ErrorCode::Timeout,
        ErrorCode::Canceled,
        ErrorCode::TagsMismatch,
    ];

    /// Maps a wire status code to a known code.
    pub fn from_code(code: i64) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
    }

    /// Returns the wire value of this code.
    pub fn code(&self) -> i64 {
        *self as i64
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ErrorCode::Ok)
    }

    /// Returns whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::Network | ErrorCode::Timeout | ErrorCode::WasRelock
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Ok => "OK",
            ErrorCode::ParseSql => "PARSE_SQL",
            ErrorCode::QueryExec => "QUERY_EXEC",
            ErrorCode::Params => "PARAMS",
            ErrorCode::Logic => "LOGIC",
            ErrorCode::ParseJson => "PARSE_JSON",
            ErrorCode::ParseDsl => "PARSE_DSL",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::ParseBin => "PARSE_BIN",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::WasRelock => "WAS_RELOCK",
            ErrorCode::NotValid => "NOT_VALID",
            ErrorCode::Network => "NETWORK",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::StateInvalidated => "STATE_INVALIDATED",
            ErrorCode::BadTransaction => "BAD_TRANSACTION",
            ErrorCode::OutdatedWal => "OUTDATED_WAL",
            ErrorCode::NoWal => "NO_WAL",
            ErrorCode::DataHashMismatch => "DATA_HASH_MISMATCH",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Canceled => "CANCELED",
            ErrorCode::TagsMismatch => "TAGS_MISMATCH",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_values() {
        assert_eq!(ErrorCode::Ok.code(), 0);
        assert_eq!(ErrorCode::Conflict.code(), 7);
        assert_eq!(ErrorCode::NotFound.code(), 13);
        assert_eq!(ErrorCode::Timeout.code(), 19);
        assert_eq!(ErrorCode::TagsMismatch.code(), 21);

        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::from_code(code.code()), Some(code));
        }
    }

    #[test]
    fn test_unknown_codes() {
        assert_eq!(ErrorCode::from_code(-1), None);
        assert_eq!(ErrorCode::from_code(22), None);
        assert_eq!(ErrorCode::from_code(i64::MAX), None);
    }

    #[test]
    fn test_error_code_retryable() {
        assert!(ErrorCode::Network.is_retryable());
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::WasRelock.is_retryable());

        assert!(!ErrorCode::ParseSql.is_retryable());
        assert!(!ErrorCode::Forbidden.is_retryable());
        assert!(!ErrorCode::NotFound.is_retryable());
        assert!(!ErrorCode::Conflict.is_retryable());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(format!("{}", ErrorCode::Ok), "OK");
        assert_eq!(format!("{}", ErrorCode::ParseSql), "PARSE_SQL");
        assert_eq!(format!("{}", ErrorCode::StateInvalidated), "STATE_INVALIDATED");
        assert_eq!(format!("{}", ErrorCode::DataHashMismatch), "DATA_HASH_MISMATCH");
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::NotFound).unwrap();
        assert_eq!(json, "\"NOT_FOUND\"");

        let parsed: ErrorCode = serde_json::from_str("\"QUERY_EXEC\"").unwrap();
        assert_eq!(parsed, ErrorCode::QueryExec);
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidMagic {
            expected: 0xEEDD1132,
            actual: 0x1234,
        };
        assert!(err.to_string().contains("0xeedd1132"));

        let err = ProtocolError::UnsupportedVersion(0x100);
        assert!(err.to_string().contains("0x0100"));

        let err = ProtocolError::FrameTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::NotEnoughArgs {
            expected: 2,
            actual: 1,
        };
        assert!(err.to_string().contains("at least 2"));

        let err = ProtocolError::UnknownStatus(-5);
        assert!(err.to_string().contains("-5"));
    }
}

//! Protocol error types and error codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during framing, crypto or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("key agreement failed: {0}")]
    KeyAgreement(String),

    #[error("unknown envelope type: {0}")]
    UnknownEnvelope(String),

    #[error("unexpected envelope: expected {expected}, got {actual}")]
    UnexpectedEnvelope {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("payload type mismatch: expected {expected}, got {actual}")]
    PayloadMismatch { expected: String, actual: String },

    #[error("missing payload")]
    MissingPayload,

    #[error("payload is sealed")]
    SealedPayload,
}

/// Stable failure codes carried in response infos.
///
/// These codes are part of the protocol contract and must remain stable
/// across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    NotAuthorized,

    // Users
    UserActivationError,
    UserAlreadyActive,
    UserIdTooShort,
    UserIdTooLong,
    UserIdInvalidCharacters,
    UserIdReserved,
    UserIdExists,
    UserIdNotExists,
    UserCannotBeDeleted,

    // Data sets
    DataSetIdExists,
    DataSetIdNotExists,
    DataSetIdTooShort,
    DataSetIdTooLong,
    DataSetIdInvalidCharacters,
    DataSetNotAuthorized,
    DataSetNotAuthorizedUpdate,
    DataSetNotAuthorizedDelete,

    // Builds
    IncompatibleBuilds,
    ServerBuildOutdated,

    // Transport and system
    ConnectionClosed,
    NoConnectionToServer,
    ApplicationError,
}

impl ErrorCode {
    /// Returns whether the failure may go away by simply trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionClosed | ErrorCode::NoConnectionToServer
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::NotAuthorized => "NOT_AUTHORIZED",
            ErrorCode::UserActivationError => "USER_ACTIVATION_ERROR",
            ErrorCode::UserAlreadyActive => "USER_ALREADY_ACTIVE",
            ErrorCode::UserIdTooShort => "USER_ID_TOO_SHORT",
            ErrorCode::UserIdTooLong => "USER_ID_TOO_LONG",
            ErrorCode::UserIdInvalidCharacters => "USER_ID_INVALID_CHARACTERS",
            ErrorCode::UserIdReserved => "USER_ID_RESERVED",
            ErrorCode::UserIdExists => "USER_ID_EXISTS",
            ErrorCode::UserIdNotExists => "USER_ID_NOT_EXISTS",
            ErrorCode::UserCannotBeDeleted => "USER_CANNOT_BE_DELETED",
            ErrorCode::DataSetIdExists => "DATA_SET_ID_EXISTS",
            ErrorCode::DataSetIdNotExists => "DATA_SET_ID_NOT_EXISTS",
            ErrorCode::DataSetIdTooShort => "DATA_SET_ID_TOO_SHORT",
            ErrorCode::DataSetIdTooLong => "DATA_SET_ID_TOO_LONG",
            ErrorCode::DataSetIdInvalidCharacters => "DATA_SET_ID_INVALID_CHARACTERS",
            ErrorCode::DataSetNotAuthorized => "DATA_SET_NOT_AUTHORIZED",
            ErrorCode::DataSetNotAuthorizedUpdate => "DATA_SET_NOT_AUTHORIZED_UPDATE",
            ErrorCode::DataSetNotAuthorizedDelete => "DATA_SET_NOT_AUTHORIZED_DELETE",
            ErrorCode::IncompatibleBuilds => "INCOMPATIBLE_BUILDS",
            ErrorCode::ServerBuildOutdated => "SERVER_BUILD_OUTDATED",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::NoConnectionToServer => "NO_CONNECTION_TO_SERVER",
            ErrorCode::ApplicationError => "APPLICATION_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_retryable() {
        assert!(ErrorCode::ConnectionClosed.is_retryable());
        assert!(ErrorCode::NoConnectionToServer.is_retryable());

        assert!(!ErrorCode::NotAuthorized.is_retryable());
        assert!(!ErrorCode::DataSetIdExists.is_retryable());
        assert!(!ErrorCode::ApplicationError.is_retryable());
    }

    #[test]
    fn test_error_code_display_matches_serde() {
        for code in [
            ErrorCode::NotAuthorized,
            ErrorCode::UserIdNotExists,
            ErrorCode::DataSetNotAuthorizedDelete,
            ErrorCode::NoConnectionToServer,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code));
        }
    }

    #[test]
    fn test_error_code_deserialization() {
        let parsed: ErrorCode = serde_json::from_str("\"DATA_SET_ID_EXISTS\"").unwrap();
        assert_eq!(parsed, ErrorCode::DataSetIdExists);
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::FrameTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::UnknownEnvelope("Bogus".to_string());
        assert!(err.to_string().contains("Bogus"));

        let err = ProtocolError::PayloadMismatch {
            expected: "User".to_string(),
            actual: "DataSet".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("User") && msg.contains("DataSet"));

        assert!(ProtocolError::InvalidUtf8.to_string().contains("UTF-8"));
    }
}

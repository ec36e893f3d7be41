//! Client error types.

use bidi_protocol::{ErrorCode, ProtocolError, ResponseInfo};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connect timeout")]
    Timeout,

    #[error("the credential bundle has no private key for user {0}")]
    MissingKey(String),

    #[error("server error: {} - {}", .code.map(|c| c.as_str()).unwrap_or("UNKNOWN"), .message)]
    ServerError {
        code: Option<ErrorCode>,
        message: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Builds the error for a failed response.
    pub fn from_info(info: &ResponseInfo) -> Self {
        ClientError::ServerError {
            code: info.code,
            message: info.message.clone().unwrap_or_default(),
        }
    }

    /// Returns the error code for this error.
    ///
    /// A closed connection maps to `CONNECTION_CLOSED`, every other
    /// transport problem to `NO_CONNECTION_TO_SERVER`.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ClientError::ConnectionClosed
            | ClientError::Protocol(ProtocolError::ConnectionClosed) => ErrorCode::ConnectionClosed,
            ClientError::ServerError { code, .. } => code.unwrap_or(ErrorCode::BadRequest),
            ClientError::MissingKey(_) => ErrorCode::BadRequest,
            _ => ErrorCode::NoConnectionToServer,
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            ClientError::Protocol(ProtocolError::Io(_) | ProtocolError::ConnectionClosed) => true,
            ClientError::ServerError { code, .. } => code.is_some_and(|c| c.is_retryable()),
            _ => false,
        }
    }
}

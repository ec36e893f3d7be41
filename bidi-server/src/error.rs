//! Server error types.

use bidi_protocol::ErrorCode;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] bidi_protocol::ProtocolError),

    #[error("storage error: {0}")]
    Storage(#[from] bidi_storage::StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("application error: {0}")]
    Application(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Converts to protocol error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ServerError::Protocol(_) => ErrorCode::BadRequest,
            ServerError::Json(_) => ErrorCode::BadRequest,
            ServerError::InvalidRequest(_) => ErrorCode::BadRequest,
            ServerError::Storage(e) => e.error_code(),
            ServerError::ShuttingDown => ErrorCode::ConnectionClosed,
            ServerError::Io(_) | ServerError::Config(_) | ServerError::Application(_) => {
                ErrorCode::ApplicationError
            }
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.error_code().is_retryable()
    }
}

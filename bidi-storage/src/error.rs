//! Storage error types.

use bidi_protocol::{ErrorCode, ProtocolError};
use thiserror::Error;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("data set not found: {0}")]
    DataSetNotFound(String),

    #[error("data corruption: {0}")]
    Corruption(String),
}

impl StorageError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            StorageError::UserNotFound(_) => ErrorCode::UserIdNotExists,
            StorageError::DataSetNotFound(_) => ErrorCode::DataSetIdNotExists,
            StorageError::InvalidIdentifier(_) => ErrorCode::BadRequest,
            _ => ErrorCode::ApplicationError,
        }
    }
}

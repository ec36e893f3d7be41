//! Message keys with positional arguments and their English rendering.
//!
//! Failure responses carry a [`TextProperty`] so that each side can render the
//! message itself; the server also fills in the rendered text.

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextKey {
    Ok,
    NotAuthorized,
    UserActivationError,
    UserAlreadyActive,
    UserIdTooShort,
    UserIdTooLong,
    UserIdInvalidCharacters,
    UserIdReserved,
    UserIdExists,
    UserIdNotExists,
    UserCannotBeDeleted,
    DataSetIdExists,
    DataSetIdNotExists,
    DataSetIdTooShort,
    DataSetIdTooLong,
    DataSetIdInvalidCharacters,
    DataSetUserNotAuthorized,
    DataSetUserNotAuthorizedUpdate,
    DataSetUserNotAuthorizedDelete,
    ApplicationError,
    ResponseError,
    ResponseMessageNotSet,
    InvalidToken,
    IncompatibleBuilds,
    ServerBuildOutdated,
    ConnectionClosed,
    NoConnectionToServer,
    ServerStarted,
    ServerNotStarted,
    ShutdownDone,
    ServerSocketAcceptError,
    LogOnWithUnknownUser,
    LogOnWithInactiveUser,
    RequestReceiveError,
    KeyAgreementFailed,
    RequestDecryptionError,
    NotificationSocketUnexpectedError,
    CreatingAdmin,
    FileCreated,
}

impl TextKey {
    fn template(&self) -> &'static str {
        match self {
            TextKey::Ok => "OK",
            TextKey::NotAuthorized => "User {0} is not authorized to perform this action.",
            TextKey::UserActivationError => "User {0} could not be activated.",
            TextKey::UserAlreadyActive => "User {0} is already active.",
            TextKey::UserIdTooShort => "The user ID must have at least {0} characters.",
            TextKey::UserIdTooLong => "The user ID must not have more than {0} characters.",
            TextKey::UserIdInvalidCharacters => {
                "The user ID must not contain the following characters: {0}"
            }
            TextKey::UserIdReserved => "The user ID {0} is reserved.",
            TextKey::UserIdExists => "A user with ID {0} already exists.",
            TextKey::UserIdNotExists => "A user with ID {0} does not exist.",
            TextKey::UserCannotBeDeleted => "User {0} cannot be deleted.",
            TextKey::DataSetIdExists => "A data set with ID {0} already exists.",
            TextKey::DataSetIdNotExists => "A data set with ID {0} does not exist.",
            TextKey::DataSetIdTooShort => "The data set ID must have at least {0} characters.",
            TextKey::DataSetIdTooLong => {
                "The data set ID must not have more than {0} characters."
            }
            TextKey::DataSetIdInvalidCharacters => {
                "The data set ID must not contain the following characters: {0}"
            }
            TextKey::DataSetUserNotAuthorized => {
                "User {0} is not authorized to read data set {1}."
            }
            TextKey::DataSetUserNotAuthorizedUpdate => {
                "User {0} is not authorized to update data set {1}."
            }
            TextKey::DataSetUserNotAuthorizedDelete => {
                "User {0} is not authorized to delete data set {1}."
            }
            TextKey::ApplicationError => "Application error: {0}",
            TextKey::ResponseError => "The response could not be sent: {0}",
            TextKey::ResponseMessageNotSet => "No response message was set by the handler.",
            TextKey::InvalidToken => "Invalid token.",
            TextKey::IncompatibleBuilds => {
                "Server and client are not compatible. Minimum compatible build: {0}, client build: {1}."
            }
            TextKey::ServerBuildOutdated => {
                "The server build {0} is outdated. Minimum compatible build: {1}."
            }
            TextKey::ConnectionClosed => "The connection was closed by the server.",
            TextKey::NoConnectionToServer => "No connection to the server: {0}",
            TextKey::ServerStarted => "Server started on {0}, port {1}.",
            TextKey::ServerNotStarted => "Server could not be started on {0}, port {1}.",
            TextKey::ShutdownDone => "Server shut down.",
            TextKey::ServerSocketAcceptError => "Error accepting a connection: {0}",
            TextKey::LogOnWithUnknownUser => "Log-on attempt with unknown user ID of length {0}.",
            TextKey::LogOnWithInactiveUser => "Log-on attempt with inactive user {0}.",
            TextKey::RequestReceiveError => "Error receiving the request: {0}",
            TextKey::KeyAgreementFailed => "Key agreement failed: {0}",
            TextKey::RequestDecryptionError => "Error decrypting the request: {0}",
            TextKey::NotificationSocketUnexpectedError => {
                "Unexpected error on the notification channel of user {0}: {1}"
            }
            TextKey::CreatingAdmin => "Creating the administrator.",
            TextKey::FileCreated => "File {0} created.",
        }
    }

    /// The stable failure code a response with this key carries, if any.
    pub fn error_code(&self) -> Option<ErrorCode> {
        let code = match self {
            TextKey::NotAuthorized => ErrorCode::NotAuthorized,
            TextKey::UserActivationError => ErrorCode::UserActivationError,
            TextKey::UserAlreadyActive => ErrorCode::UserAlreadyActive,
            TextKey::UserIdTooShort => ErrorCode::UserIdTooShort,
            TextKey::UserIdTooLong => ErrorCode::UserIdTooLong,
            TextKey::UserIdInvalidCharacters => ErrorCode::UserIdInvalidCharacters,
            TextKey::UserIdReserved => ErrorCode::UserIdReserved,
            TextKey::UserIdExists => ErrorCode::UserIdExists,
            TextKey::UserIdNotExists => ErrorCode::UserIdNotExists,
            TextKey::UserCannotBeDeleted => ErrorCode::UserCannotBeDeleted,
            TextKey::DataSetIdExists => ErrorCode::DataSetIdExists,
            TextKey::DataSetIdNotExists => ErrorCode::DataSetIdNotExists,
            TextKey::DataSetIdTooShort => ErrorCode::DataSetIdTooShort,
            TextKey::DataSetIdTooLong => ErrorCode::DataSetIdTooLong,
            TextKey::DataSetIdInvalidCharacters => ErrorCode::DataSetIdInvalidCharacters,
            TextKey::DataSetUserNotAuthorized => ErrorCode::DataSetNotAuthorized,
            TextKey::DataSetUserNotAuthorizedUpdate => ErrorCode::DataSetNotAuthorizedUpdate,
            TextKey::DataSetUserNotAuthorizedDelete => ErrorCode::DataSetNotAuthorizedDelete,
            TextKey::ApplicationError | TextKey::ResponseError => ErrorCode::ApplicationError,
            TextKey::IncompatibleBuilds => ErrorCode::IncompatibleBuilds,
            TextKey::ServerBuildOutdated => ErrorCode::ServerBuildOutdated,
            TextKey::ConnectionClosed => ErrorCode::ConnectionClosed,
            TextKey::NoConnectionToServer => ErrorCode::NoConnectionToServer,
            _ => return None,
        };
        Some(code)
    }
}

/// A message key plus positional arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextProperty {
    pub key: TextKey,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl TextProperty {
    pub fn new(key: TextKey) -> Self {
        Self {
            key,
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Renders the message, substituting `{n}` with the n-th argument.
    pub fn resolve(&self) -> String {
        let mut text = self.key.template().to_string();
        for (i, arg) in self.args.iter().enumerate() {
            text = text.replace(&format!("{{{}}}", i), arg);
        }
        text
    }
}

impl From<TextKey> for TextProperty {
    fn from(key: TextKey) -> Self {
        Self::new(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_substitutes_arguments() {
        let text = TextProperty::new(TextKey::DataSetUserNotAuthorizedUpdate)
            .with_arg("alice")
            .with_arg("game-1");
        assert_eq!(
            text.resolve(),
            "User alice is not authorized to update data set game-1."
        );
    }

    #[test]
    fn test_resolve_without_arguments() {
        assert_eq!(TextProperty::new(TextKey::InvalidToken).resolve(), "Invalid token.");
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            TextKey::NotAuthorized.error_code(),
            Some(ErrorCode::NotAuthorized)
        );
        assert_eq!(
            TextKey::DataSetUserNotAuthorized.error_code(),
            Some(ErrorCode::DataSetNotAuthorized)
        );
        assert_eq!(TextKey::Ok.error_code(), None);
        assert_eq!(TextKey::ServerStarted.error_code(), None);
    }

    #[test]
    fn test_serialization_omits_empty_args() {
        let json = serde_json::to_string(&TextProperty::new(TextKey::Ok)).unwrap();
        assert_eq!(json, r#"{"key":"Ok"}"#);
    }
}

//! Self-describing request/response envelopes.
//!
//! Every message on the wire is an [`Envelope`]: a closed tagged union
//! serialized as `{"class": <tag>, "obj": <body>}`. The receiver picks the
//! concrete type from the tag and rejects anything it does not know.

use crate::error::{ErrorCode, ProtocolError};
use crate::payload::{Payload, PayloadType};
use crate::text::{TextKey, TextProperty};
use crate::NULL_UUID;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The closed request catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    ActivateUser,
    ChangeUser,
    Shutdown,
    Ping,
    GetUser,
    GetUsers,
    DeleteUser,
    GetServerStatus,
    GetLog,
    SetLogLevel,
    EstablishNotificationSocket,
    GetDataSetInfosOfUser,
    CreateDataSet,
    UpdateDataSet,
    DeleteDataSet,
    GetDataSet,
    PushNotification,
    PushNotificationReceived,
    Disconnect,
    Custom,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::ActivateUser => "ACTIVATE_USER",
            RequestType::ChangeUser => "CHANGE_USER",
            RequestType::Shutdown => "SHUTDOWN",
            RequestType::Ping => "PING",
            RequestType::GetUser => "GET_USER",
            RequestType::GetUsers => "GET_USERS",
            RequestType::DeleteUser => "DELETE_USER",
            RequestType::GetServerStatus => "GET_SERVER_STATUS",
            RequestType::GetLog => "GET_LOG",
            RequestType::SetLogLevel => "SET_LOG_LEVEL",
            RequestType::EstablishNotificationSocket => "ESTABLISH_NOTIFICATION_SOCKET",
            RequestType::GetDataSetInfosOfUser => "GET_DATA_SET_INFOS_OF_USER",
            RequestType::CreateDataSet => "CREATE_DATA_SET",
            RequestType::UpdateDataSet => "UPDATE_DATA_SET",
            RequestType::DeleteDataSet => "DELETE_DATA_SET",
            RequestType::GetDataSet => "GET_DATA_SET",
            RequestType::PushNotification => "PUSH_NOTIFICATION",
            RequestType::PushNotificationReceived => "PUSH_NOTIFICATION_RECEIVED",
            RequestType::Disconnect => "DISCONNECT",
            RequestType::Custom => "CUSTOM",
        }
    }

    /// Requests only the administrator may issue.
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            RequestType::ChangeUser
                | RequestType::DeleteUser
                | RequestType::Shutdown
                | RequestType::GetLog
                | RequestType::SetLogLevel
        )
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First message of every connection, sent RSA-encrypted to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_build: Option<String>,
    /// The user id, as a `String` payload.
    pub payload: Payload,
}

impl Identity {
    pub fn new(
        session_id: impl Into<String>,
        client_build: Option<String>,
        user_id: &str,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            session_id: session_id.into(),
            client_build,
            payload: Payload::new(&user_id.to_string())?,
        })
    }

    pub fn user_id(&self) -> Result<String, ProtocolError> {
        self.payload.decode()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub session_id: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_build: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl RequestMessage {
    pub fn new(request_type: RequestType) -> Self {
        Self {
            request_type,
            session_id: NULL_UUID.to_string(),
            token: NULL_UUID.to_string(),
            client_build: None,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Decodes the payload as `T`; a missing payload is an error.
    pub fn payload_as<T: PayloadType>(&self) -> Result<T, ProtocolError> {
        self.payload
            .as_ref()
            .ok_or(ProtocolError::MissingPayload)?
            .decode()
    }
}

/// Outcome of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_build: Option<String>,
}

impl ResponseInfo {
    pub fn success() -> Self {
        Self {
            success: true,
            message: None,
            code: None,
            server_build: None,
        }
    }

    pub fn failure(text: &TextProperty) -> Self {
        Self {
            success: false,
            message: Some(text.resolve()),
            code: text.key.error_code(),
            server_build: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub info: ResponseInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextProperty>,
}

impl ResponseMessage {
    pub fn ok() -> Self {
        Self {
            info: ResponseInfo::success(),
            payload: None,
            text: None,
        }
    }

    pub fn ok_with<T: PayloadType>(value: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            info: ResponseInfo::success(),
            payload: Some(Payload::new(value)?),
            text: None,
        })
    }

    pub fn failure(text: impl Into<TextProperty>) -> Self {
        let text = text.into();
        Self {
            info: ResponseInfo::failure(&text),
            payload: None,
            text: Some(text),
        }
    }

    pub fn from_parts(info: ResponseInfo, payload: Option<Payload>) -> Self {
        Self {
            info,
            payload,
            text: None,
        }
    }

    pub fn with_server_build(mut self, build: Option<String>) -> Self {
        self.info.server_build = build;
        self
    }

    pub fn is_success(&self) -> bool {
        self.info.success
    }

    /// The failure code, if any. Failures without a specific code report
    /// `BAD_REQUEST`.
    pub fn code(&self) -> Option<ErrorCode> {
        if self.info.success {
            None
        } else {
            Some(self.info.code.unwrap_or(ErrorCode::BadRequest))
        }
    }

    pub fn text_key(&self) -> Option<TextKey> {
        self.text.as_ref().map(|t| t.key)
    }

    pub fn payload_as<T: PayloadType>(&self) -> Result<T, ProtocolError> {
        self.payload
            .as_ref()
            .ok_or(ProtocolError::MissingPayload)?
            .decode()
    }
}

/// Any message that crosses the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Identity(Identity),
    Request(RequestMessage),
    Response(ResponseMessage),
}

#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    class: String,
    obj: Value,
}

impl Envelope {
    pub fn tag(&self) -> &'static str {
        match self {
            Envelope::Identity(_) => "Identity",
            Envelope::Request(_) => "Request",
            Envelope::Response(_) => "Response",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let obj = match self {
            Envelope::Identity(m) => serde_json::to_value(m)?,
            Envelope::Request(m) => serde_json::to_value(m)?,
            Envelope::Response(m) => serde_json::to_value(m)?,
        };
        let raw = RawEnvelope {
            class: self.tag().to_string(),
            obj,
        };
        Ok(serde_json::to_string(&raw)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        match raw.class.as_str() {
            "Identity" => Ok(Envelope::Identity(serde_json::from_value(raw.obj)?)),
            "Request" => Ok(Envelope::Request(serde_json::from_value(raw.obj)?)),
            "Response" => Ok(Envelope::Response(serde_json::from_value(raw.obj)?)),
            _ => Err(ProtocolError::UnknownEnvelope(raw.class)),
        }
    }

    pub fn into_identity(self) -> Result<Identity, ProtocolError> {
        match self {
            Envelope::Identity(m) => Ok(m),
            other => Err(other.unexpected("Identity")),
        }
    }

    pub fn into_request(self) -> Result<RequestMessage, ProtocolError> {
        match self {
            Envelope::Request(m) => Ok(m),
            other => Err(other.unexpected("Request")),
        }
    }

    pub fn into_response(self) -> Result<ResponseMessage, ProtocolError> {
        match self {
            Envelope::Response(m) => Ok(m),
            other => Err(other.unexpected("Response")),
        }
    }

    fn unexpected(&self, expected: &'static str) -> ProtocolError {
        ProtocolError::UnexpectedEnvelope {
            expected,
            actual: self.tag(),
        }
    }
}

impl From<Identity> for Envelope {
    fn from(m: Identity) -> Self {
        Envelope::Identity(m)
    }
}

impl From<RequestMessage> for Envelope {
    fn from(m: RequestMessage) -> Self {
        Envelope::Request(m)
    }
}

impl From<ResponseMessage> for Envelope {
    fn from(m: ResponseMessage) -> Self {
        Envelope::Response(m)
    }
}

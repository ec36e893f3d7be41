//! Built-in payload types exchanged by the request catalog.

use crate::payload::{Payload, PayloadType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Severity of server log events, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Verbose,
    Information,
    Warning,
    Error,
    Critical,
    General,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Verbose => "Verbose",
            LogLevel::Information => "Information",
            LogLevel::Warning => "Warning",
            LogLevel::Error => "Error",
            LogLevel::Critical => "Critical",
            LogLevel::General => "General",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Information
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "verbose" => Ok(LogLevel::Verbose),
            "information" | "info" => Ok(LogLevel::Information),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            "general" => Ok(LogLevel::General),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

impl PayloadType for LogLevel {
    const TAG: &'static str = "LogLevel";
}

/// Verdict of a build compatibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCheck {
    pub compatible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_compatible_build: Option<String>,
}

impl BuildCheck {
    pub fn compatible() -> Self {
        Self {
            compatible: true,
            minimum_compatible_build: None,
        }
    }

    pub fn incompatible(minimum_compatible_build: impl Into<String>) -> Self {
        Self {
            compatible: false,
            minimum_compatible_build: Some(minimum_compatible_build.into()),
        }
    }
}

/// Server reply to an identity envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdResponse {
    pub token: String,
    pub session_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_check: Option<BuildCheck>,
}

impl PayloadType for UserIdResponse {
    const TAG: &'static str = "UserIdResponse";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivateUserRequest {
    pub user_id: String,
    pub activation_code: String,
    pub user_public_key: String,
}

impl PayloadType for ActivateUserRequest {
    const TAG: &'static str = "ActivateUserRequest";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeUserRequest {
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub custom_data: BTreeMap<String, String>,
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub renew_credentials: bool,
}

impl PayloadType for ChangeUserRequest {
    const TAG: &'static str = "ChangeUserRequest";
}

/// Everything a new user needs to activate, handed out by the administrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeUserResponse {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_code: Option<String>,
    pub server_url: String,
    pub server_port: u16,
    #[serde(default)]
    pub admin_email: String,
    pub server_public_key: String,
}

impl PayloadType for ChangeUserResponse {
    const TAG: &'static str = "ChangeUserResponse";
}

/// Public view of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub custom_data: BTreeMap<String, String>,
    pub active: bool,
}

impl PayloadType for User {
    const TAG: &'static str = "User";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Users {
    pub users: Vec<User>,
}

impl PayloadType for Users {
    const TAG: &'static str = "Users";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Start time in epoch milliseconds.
    pub server_start_date: i64,
    pub log_size_bytes: u64,
    pub log_level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
}

impl PayloadType for ServerStatus {
    const TAG: &'static str = "ServerStatus";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogFile {
    pub file_name: String,
    pub content: String,
}

impl PayloadType for LogFile {
    const TAG: &'static str = "Log";
}

/// An application data set and the users allowed to access it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    pub id: String,
    #[serde(default)]
    pub user_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl DataSet {
    pub fn new(id: impl Into<String>, user_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            id: id.into(),
            user_ids: user_ids.into_iter().collect(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_authorized(&self, user_id: &str) -> bool {
        user_id == crate::ADMIN_USER_ID || self.user_ids.contains(user_id)
    }
}

impl PayloadType for DataSet {
    const TAG: &'static str = "DataSet";
}

/// Lightweight summary of a data set kept in memory by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSetInfo {
    pub id: String,
    #[serde(default)]
    pub user_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSetInfos {
    pub infos: Vec<DataSetInfo>,
}

impl PayloadType for DataSetInfos {
    const TAG: &'static str = "DataSetInfos";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushNotificationRequest {
    pub recipients: Vec<String>,
    pub payload: Payload,
}

impl PayloadType for PushNotificationRequest {
    const TAG: &'static str = "PushNotificationRequest";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Verbose < LogLevel::Information);
        assert!(LogLevel::Information < LogLevel::Warning);
        assert!(LogLevel::Critical < LogLevel::General);
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("Critical".parse::<LogLevel>().unwrap(), LogLevel::Critical);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_data_set_authorization() {
        let ds = DataSet::new("game", vec!["alice".to_string()]);
        assert!(ds.is_authorized("alice"));
        assert!(ds.is_authorized(crate::ADMIN_USER_ID));
        assert!(!ds.is_authorized("bob"));
    }

    #[test]
    fn test_nested_payload_in_data_set() {
        let inner = Payload::new(&"board".to_string()).unwrap();
        let ds = DataSet::new("game", vec!["alice".to_string()]).with_payload(inner);
        let outer = Payload::new(&ds).unwrap();

        let decoded: DataSet = outer.decode().unwrap();
        assert_eq!(
            decoded.payload.unwrap().decode::<String>().unwrap(),
            "board"
        );
    }

    #[test]
    fn test_change_user_request_defaults() {
        let req: ChangeUserRequest = serde_json::from_str(r#"{"user_id":"bob"}"#).unwrap();
        assert_eq!(req.user_id, "bob");
        assert!(!req.create);
        assert!(req.custom_data.is_empty());
    }
}

//! Notifications pushed from the server to connected clients.

use crate::error::ProtocolError;
use crate::payload::{Payload, PayloadType};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Upper bound of the rolling id counter.
const ID_COUNTER_MAX: u32 = 9999;

static ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Returns `<millis><counter:04>`; ids sort lexically in creation order
/// within the same number of millisecond digits.
pub fn next_notification_id(created_millis: i64) -> String {
    let counter = ID_COUNTER
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
            Some(if c >= ID_COUNTER_MAX { 0 } else { c + 1 })
        })
        .unwrap_or(0);
    format!("{}{:04}", created_millis, counter)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub ping: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub date_created: i64,
    /// Payload sealed with the recipient's public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_encrypted: Option<Payload>,
}

impl Notification {
    /// A liveness pulse: no id, no payload.
    pub fn ping() -> Self {
        Self {
            ping: true,
            id: None,
            sender: None,
            recipients: Vec::new(),
            date_created: 0,
            payload_encrypted: None,
        }
    }

    /// Creates a notification for one recipient, sealing the payload with
    /// that recipient's key.
    pub fn new(
        sender: impl Into<String>,
        recipients: Vec<String>,
        mut payload: Payload,
        recipient_key: &RsaPublicKey,
    ) -> Result<Self, ProtocolError> {
        let date_created = chrono::Utc::now().timestamp_millis();
        payload.seal(recipient_key)?;
        Ok(Self {
            ping: false,
            id: Some(next_notification_id(date_created)),
            sender: Some(sender.into()),
            recipients,
            date_created,
            payload_encrypted: Some(payload),
        })
    }

    pub fn is_ping(&self) -> bool {
        self.ping
    }

    /// Opens the sealed payload with the recipient's private key.
    pub fn open_payload(&self, key: &RsaPrivateKey) -> Result<Option<Payload>, ProtocolError> {
        match &self.payload_encrypted {
            Some(sealed) => {
                let mut payload = sealed.clone();
                payload.open(key)?;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// One delivery unit on the notification channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationBatch {
    pub notifications: Vec<Notification>,
}

impl PayloadType for NotificationBatch {
    const TAG: &'static str = "Notifications";
}

impl NotificationBatch {
    pub fn single(notification: Notification) -> Self {
        Self {
            notifications: vec![notification],
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

//! Credential bundle handed to each user: everything a client needs to
//! identify itself to one server.

use crate::crypto::{self, KeyPair};
use crate::error::ProtocolError;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Socket timeout used when a bundle does not set one.
pub const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfiguration {
    pub user_id: String,
    pub url: String,
    pub port: u16,
    /// Socket timeout in seconds, 0 for the default.
    #[serde(default)]
    pub timeout: u64,
    /// Base64 DER private key. Absent for the activation identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_private_key: Option<String>,
    /// Base64 DER public key of the server.
    pub server_public_key: String,
    #[serde(default)]
    pub admin_email: String,
}

impl ClientConfiguration {
    /// Suggested file name: `<userId>_<url>_<port>`, with every character
    /// outside `[A-Za-z0-9.-]` replaced by `_`.
    pub fn file_name(user_id: &str, url: &str, port: u16) -> String {
        format!("{}_{}_{}", sanitize(user_id), sanitize(url), port)
    }

    pub fn default_file_name(&self) -> String {
        Self::file_name(&self.user_id, &self.url, self.port)
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), ProtocolError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn server_public_key(&self) -> Result<RsaPublicKey, ProtocolError> {
        crypto::decode_public_key(&self.server_public_key)
    }

    /// The user's key pair, if the bundle carries a private key.
    pub fn user_keys(&self) -> Result<Option<KeyPair>, ProtocolError> {
        self.user_private_key
            .as_deref()
            .map(KeyPair::from_private_base64)
            .transpose()
    }

    pub fn socket_timeout(&self) -> Duration {
        if self.timeout > 0 {
            Duration::from_secs(self.timeout)
        } else {
            Duration::from_secs(DEFAULT_CLIENT_TIMEOUT_SECS)
        }
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_is_sanitized() {
        assert_eq!(
            ClientConfiguration::file_name("_ADMIN", "my host:1/x", 56084),
            "_ADMIN_my_host_1_x_56084"
        );
        assert_eq!(
            ClientConfiguration::file_name("bob", "bidi.example-1.org", 80),
            "bob_bidi.example-1.org_80"
        );
    }

    #[test]
    fn test_keys_and_timeout() {
        let user = KeyPair::generate().unwrap();
        let server = KeyPair::generate().unwrap();
        let mut bundle = ClientConfiguration {
            user_id: "bob".into(),
            url: "localhost".into(),
            port: 56084,
            timeout: 0,
            user_private_key: Some(user.private_base64().unwrap()),
            server_public_key: server.public_base64().unwrap(),
            admin_email: String::new(),
        };

        assert_eq!(bundle.server_public_key().unwrap(), server.public);
        assert_eq!(bundle.user_keys().unwrap().unwrap().public, user.public);
        assert_eq!(bundle.socket_timeout(), Duration::from_secs(10));

        bundle.timeout = 3;
        bundle.user_private_key = None;
        assert_eq!(bundle.socket_timeout(), Duration::from_secs(3));
        assert!(bundle.user_keys().unwrap().is_none());
    }

    #[test]
    fn test_file_roundtrip() {
        let server = KeyPair::generate().unwrap();
        let bundle = ClientConfiguration {
            user_id: "bob".into(),
            url: "localhost".into(),
            port: 1234,
            timeout: 5,
            user_private_key: None,
            server_public_key: server.public_base64().unwrap(),
            admin_email: "admin@example.org".into(),
        };
        let path = std::env::temp_dir().join(format!("bidi-bundle-{}", std::process::id()));
        bundle.write_to_file(&path).unwrap();
        let read = ClientConfiguration::read_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(read, bundle);
    }
}

//! Typed, self-describing payloads.
//!
//! A payload is a tagged union of a stable type tag and the JSON form of the
//! value. The tag is declared per Rust type through [`PayloadType`], so
//! decoding is a closed lookup: asking for a type whose tag differs from the
//! one on the wire is an error, never a guess.

use crate::crypto;
use crate::error::ProtocolError;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value that can travel inside a [`Payload`].
pub trait PayloadType: Serialize + DeserializeOwned {
    /// Stable wire tag for this type.
    const TAG: &'static str;
}

impl PayloadType for String {
    const TAG: &'static str = "String";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Type tag of the carried value.
    pub class_name: String,

    /// Plain JSON form; blanked once the payload is sealed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,

    /// Base64 RSA envelope of the JSON form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_rsa_encrypted: Option<String>,
}

impl Payload {
    pub fn new<T: PayloadType>(value: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            class_name: T::TAG.to_string(),
            json: Some(serde_json::to_value(value)?),
            json_rsa_encrypted: None,
        })
    }

    /// Builds a payload from an already serialized value.
    pub fn raw(tag: impl Into<String>, json: Value) -> Self {
        Self {
            class_name: tag.into(),
            json: Some(json),
            json_rsa_encrypted: None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.class_name
    }

    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    pub fn is_sealed(&self) -> bool {
        self.json.is_none() && self.json_rsa_encrypted.is_some()
    }

    pub fn is<T: PayloadType>(&self) -> bool {
        self.class_name == T::TAG
    }

    /// Decodes the payload into `T`, checking the tag first.
    pub fn decode<T: PayloadType>(&self) -> Result<T, ProtocolError> {
        if self.class_name != T::TAG {
            return Err(ProtocolError::PayloadMismatch {
                expected: T::TAG.to_string(),
                actual: self.class_name.clone(),
            });
        }
        match &self.json {
            Some(json) => Ok(T::deserialize(json)?),
            None if self.json_rsa_encrypted.is_some() => Err(ProtocolError::SealedPayload),
            None => Err(ProtocolError::MissingPayload),
        }
    }

    /// RSA-encrypts the JSON form in place and blanks the plain form.
    pub fn seal(&mut self, key: &RsaPublicKey) -> Result<(), ProtocolError> {
        let json = self.json.take().unwrap_or(Value::Null);
        let text = serde_json::to_string(&json)?;
        match crypto::rsa_seal_base64(&text, key) {
            Ok(sealed) => {
                self.json_rsa_encrypted = Some(sealed);
                Ok(())
            }
            Err(e) => {
                self.json = Some(json);
                Err(e)
            }
        }
    }

    /// Restores the plain JSON form of a sealed payload.
    pub fn open(&mut self, key: &RsaPrivateKey) -> Result<(), ProtocolError> {
        let sealed = match &self.json_rsa_encrypted {
            Some(sealed) => sealed,
            None => return Ok(()),
        };
        let text = crypto::rsa_open_base64(sealed, key)?;
        self.json = Some(serde_json::from_str(&text)?);
        Ok(())
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.json {
            Some(json) => write!(f, "{}", json),
            None => write!(f, "<{} sealed>", self.class_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Move {
        player: String,
        squares: Vec<u8>,
        notes: BTreeMap<String, String>,
    }

    impl PayloadType for Move {
        const TAG: &'static str = "Move";
    }

    fn sample() -> Move {
        let mut notes = BTreeMap::new();
        notes.insert("turn".to_string(), "3".to_string());
        Move {
            player: "alice".to_string(),
            squares: vec![1, 9, 42],
            notes,
        }
    }

    #[test]
    fn test_payload_roundtrip_through_json() {
        let payload = Payload::new(&sample()).unwrap();
        let text = serde_json::to_string(&payload).unwrap();
        let parsed: Payload = serde_json::from_str(&text).unwrap();

        assert_eq!(parsed.tag(), "Move");
        assert_eq!(parsed.decode::<Move>().unwrap(), sample());
    }

    #[test]
    fn test_decode_with_wrong_tag_is_rejected() {
        let payload = Payload::new(&"hello".to_string()).unwrap();
        let err = payload.decode::<Move>().unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadMismatch { .. }));
        assert_eq!(payload.decode::<String>().unwrap(), "hello");
    }

    #[test]
    fn test_seal_and_open() {
        let keys = KeyPair::generate().unwrap();
        let mut payload = Payload::new(&sample()).unwrap();

        payload.seal(&keys.public).unwrap();
        assert!(payload.is_sealed());
        assert!(payload.json().is_none());
        assert!(matches!(
            payload.decode::<Move>(),
            Err(ProtocolError::SealedPayload)
        ));

        // Survives the wire while sealed
        let text = serde_json::to_string(&payload).unwrap();
        let mut parsed: Payload = serde_json::from_str(&text).unwrap();
        parsed.open(&keys.private).unwrap();
        assert_eq!(parsed.decode::<Move>().unwrap(), sample());
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let keys = KeyPair::generate().unwrap();
        let other = KeyPair::generate().unwrap();
        let mut payload = Payload::new(&sample()).unwrap();
        payload.seal(&keys.public).unwrap();
        assert!(payload.open(&other.private).is_err());
    }

    #[test]
    fn test_display() {
        let payload = Payload::new(&"x".to_string()).unwrap();
        assert_eq!(payload.to_string(), "\"x\"");
    }
}

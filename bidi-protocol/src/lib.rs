//! # bidi-protocol
//!
//! Wire protocol for the bidi client/server substrate.
//!
//! This crate provides:
//! - Length-prefixed framing over a byte stream
//! - RSA chunk envelopes, Diffie-Hellman key agreement and AES session ciphers
//! - Self-describing request/response envelopes with typed payloads
//! - Notifications, identifier validation and localizable message keys
//! - The credential bundle a client identifies itself with

pub mod agreement;
pub mod bundle;
pub mod codec;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod ident;
pub mod notification;
pub mod payload;
pub mod text;
pub mod types;

pub use agreement::{key_agreement_client, key_agreement_server};
pub use bundle::ClientConfiguration;
pub use codec::{Decoder, FramedStream};
pub use crypto::{Ciphers, DhKeyPair, DhPublicKey, KeyPair, SessionCipher};
pub use envelope::{Envelope, Identity, RequestMessage, RequestType, ResponseInfo, ResponseMessage};
pub use error::{ErrorCode, ProtocolError};
pub use frame::{Frame, LENGTH_PREFIX_SIZE};
pub use ident::{check_identifier, is_reserved_user_id, IdentifierCheck};
pub use notification::{Notification, NotificationBatch};
pub use payload::{Payload, PayloadType};
pub use text::{TextKey, TextProperty};

/// Default port for the bidi server.
pub const DEFAULT_PORT: u16 = 56084;

/// Maximum frame payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Session id and token sent when there is nothing to present.
pub const NULL_UUID: &str = "00000000-0000-0000-0000-000000000000";

/// Reserved administrator identity.
pub const ADMIN_USER_ID: &str = "_ADMIN";

/// Reserved pseudo-identity used only to activate new users.
pub const ACTIVATION_USER_ID: &str = "_ACTIVATE";

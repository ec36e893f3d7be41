//! # bidi-server
//!
//! Server side of the bidi client/server substrate.
//!
//! This crate provides:
//! - The TCP accept loop with a connection cap
//! - The RSA identity handshake, key agreement and session cipher cache
//! - Request dispatch with authorization and after-send actions
//! - Users, data sets and durable push notifications
//! - The event log and the application extension hooks

pub mod app;
pub mod bootstrap;
pub mod ciphers;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod event_log;
pub mod handler;
pub mod notify;
pub mod pulse;
pub mod server;
pub mod state;

pub use app::{Application, CustomResponse, DefaultApplication};
pub use ciphers::CipherCache;
pub use config::{
    Config, ConfigError, NetworkConfig, NotificationsConfig, ServerSection, SessionsConfig,
    StorageConfig,
};
pub use connection::{Connection, ConnectionOutcome};
pub use context::{AfterSend, RequestContext};
pub use error::ServerError;
pub use event_log::{EventLog, LogEntry, LogEventId};
pub use handler::RequestHandler;
pub use notify::NotificationHub;
pub use pulse::{PulseManager, PulseResult};
pub use server::{Server, ServerStats};
pub use state::ServerState;

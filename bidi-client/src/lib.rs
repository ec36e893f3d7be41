//! # bidi-client
//!
//! Client library for bidi.
//!
//! This crate provides:
//! - The client side of the identity handshake and key agreement
//! - Session reuse across requests of one client
//! - A typed API for every request type
//! - A notification receiver that acknowledges deliveries and reconnects
//! - User activation from a CHANGE_USER response

pub mod client;
pub mod connection;
pub mod error;
pub mod handler;
mod receiver;

pub use bidi_protocol::ClientConfiguration;
pub use client::{Activation, Client, RECONNECT_INTERVAL};
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
pub use handler::{ClientHandler, DefaultClientHandler};

//! Hooks through which an application reacts to the server.

use bidi_protocol::types::BuildCheck;
use bidi_protocol::{Notification, Payload};

pub trait ClientHandler: Send + Sync {
    /// Build of the client application, sent with every identity.
    fn build(&self) -> Option<String> {
        None
    }

    /// Decides whether this client can talk to a server of the given build.
    /// Only called when the server accepted the client build.
    fn check_server_build(&self, _server_build: &str) -> BuildCheck {
        BuildCheck::compatible()
    }

    /// Called once per delivered notification, before it is acknowledged.
    /// `payload` is already opened with the user's private key.
    fn on_notification(&self, notification: &Notification, payload: Option<Payload>);

    /// Called when the notification channel comes up or goes down.
    fn on_connection_status_changed(&self, _connected: bool) {}
}

/// Handler that only reports its build and logs what it receives.
#[derive(Debug, Default, Clone)]
pub struct DefaultClientHandler {
    build: Option<String>,
}

impl DefaultClientHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_build(build: Option<String>) -> Self {
        Self { build }
    }
}

impl ClientHandler for DefaultClientHandler {
    fn build(&self) -> Option<String> {
        self.build.clone()
    }

    fn on_notification(&self, notification: &Notification, payload: Option<Payload>) {
        tracing::info!(
            "Notification {} from {} ({})",
            notification.id.as_deref().unwrap_or("-"),
            notification.sender.as_deref().unwrap_or("-"),
            payload.as_ref().map(|p| p.tag()).unwrap_or("no payload")
        );
    }
}

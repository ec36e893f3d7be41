//! Hooks through which an application customizes the server.

use crate::config::Config;
use crate::error::ServerError;
use crate::state::ServerState;
use bidi_protocol::types::BuildCheck;
use bidi_protocol::{Payload, ResponseInfo};
use serde_json::Value;
use std::collections::BTreeSet;

/// Result of a CUSTOM request.
pub type CustomResponse = (ResponseInfo, Option<Payload>);

pub trait Application: Send + Sync {
    /// Build of the server application, reported in every response.
    fn build(&self) -> Option<String>;

    /// Decides whether a client build can talk to this server. Only called
    /// when both builds are known.
    fn check_client_build(&self, _client_build: &str) -> BuildCheck {
        BuildCheck::compatible()
    }

    /// Handles a CUSTOM request. `state` gives access to users, data sets,
    /// notifications and the event log.
    fn on_custom_request(
        &self,
        state: &ServerState,
        user_id: &str,
        payload: Option<&Payload>,
    ) -> Result<CustomResponse, ServerError>;

    /// Computes the payload of a data set's in-memory info. Called whenever
    /// a data set is loaded or written.
    fn data_set_info_payload(
        &self,
        _data_set_id: &str,
        _user_ids: &BTreeSet<String>,
        _data_set_payload: Option<&Payload>,
        _current_info_payload: Option<&Payload>,
    ) -> Option<Payload> {
        None
    }

    /// Upgrades the JSON of a data set payload written by an older build.
    /// Returns `None` when nothing changed.
    fn migrate_data_set(&self, _tag: &str, _json: &Value) -> Option<Value> {
        None
    }

    /// Called after the configuration changed at runtime.
    fn on_configuration_updated(&self, _config: &Config) {}
}

/// Application used by the standalone daemon. Accepts every client build and
/// answers CUSTOM requests with an empty success.
#[derive(Debug, Default, Clone)]
pub struct DefaultApplication {
    build: Option<String>,
}

impl DefaultApplication {
    pub fn new() -> Self {
        Self {
            build: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    pub fn with_build(build: impl Into<String>) -> Self {
        Self {
            build: Some(build.into()),
        }
    }
}

impl Application for DefaultApplication {
    fn build(&self) -> Option<String> {
        self.build.clone()
    }

    fn on_custom_request(
        &self,
        _state: &ServerState,
        user_id: &str,
        _payload: Option<&Payload>,
    ) -> Result<CustomResponse, ServerError> {
        tracing::debug!("Custom request from {} ignored", user_id);
        Ok((ResponseInfo::success(), None))
    }
}

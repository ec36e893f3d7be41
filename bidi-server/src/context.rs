//! Per-request state passed from the connection to the dispatcher and back.

use bidi_protocol::{RequestMessage, RequestType, ResponseMessage, TextProperty, ADMIN_USER_ID};
use bidi_storage::StoredUser;

/// Work that must wait until the response has reached the client.
#[derive(Debug, Clone, PartialEq)]
pub enum AfterSend {
    /// Persist a user changed by the request.
    PersistUser(StoredUser),
    /// Stop the server.
    Shutdown,
}

/// One request of one authenticated user.
#[derive(Debug)]
pub struct RequestContext {
    peer: String,
    user_id: String,
    request: RequestMessage,
    response: Option<ResponseMessage>,
    after_send: Option<AfterSend>,
}

impl RequestContext {
    pub fn new(
        peer: impl Into<String>,
        user_id: impl Into<String>,
        request: RequestMessage,
    ) -> Self {
        Self {
            peer: peer.into(),
            user_id: user_id.into(),
            request,
            response: None,
            after_send: None,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_admin(&self) -> bool {
        self.user_id == ADMIN_USER_ID
    }

    pub fn request(&self) -> &RequestMessage {
        &self.request
    }

    pub fn request_type(&self) -> RequestType {
        self.request.request_type
    }

    /// Sets the response. Only the first response of a request counts.
    pub fn respond(&mut self, response: ResponseMessage) {
        if self.response.is_some() {
            tracing::debug!(
                "[{}] Response to {} already set, ignoring",
                self.peer,
                self.request.request_type
            );
            return;
        }
        self.response = Some(response);
    }

    /// Shorthand for a failure response.
    pub fn fail(&mut self, text: impl Into<TextProperty>) {
        self.respond(ResponseMessage::failure(text));
    }

    /// Replaces whatever was set with a failure. Used when the handler
    /// itself failed.
    pub(crate) fn override_with_failure(&mut self, text: TextProperty) {
        self.response = Some(ResponseMessage::failure(text));
        self.after_send = None;
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    pub fn response(&self) -> Option<&ResponseMessage> {
        self.response.as_ref()
    }

    pub fn take_response(&mut self) -> Option<ResponseMessage> {
        self.response.take()
    }

    pub fn defer(&mut self, action: AfterSend) {
        self.after_send = Some(action);
    }

    pub fn take_after_send(&mut self) -> Option<AfterSend> {
        self.after_send.take()
    }
}

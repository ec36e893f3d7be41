//! Server side of one connection: identity, key agreement or session reuse,
//! one request, one response.
//!
//! Handshake failures are logged and end the connection without an answer.
//! The only message sent before the session is the identity
//! acknowledgement, sealed with the user's public key.

use crate::context::{AfterSend, RequestContext};
use crate::event_log::{LogEntry, LogEventId};
use crate::handler::RequestHandler;
use crate::state::ServerState;
use bidi_protocol::ident::is_reserved_user_id;
use bidi_protocol::types::{BuildCheck, LogLevel, UserIdResponse};
use bidi_protocol::{
    key_agreement_server, Ciphers, Envelope, FramedStream, Payload, ProtocolError, RequestMessage,
    RequestType, ResponseInfo, ResponseMessage, TextKey, TextProperty, ACTIVATION_USER_ID,
    NULL_UUID,
};
use rsa::RsaPublicKey;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// The handshake was rejected; nothing or only the identity ack was sent.
    Rejected,
    /// A request was answered and the socket closed.
    Answered,
    /// The socket became the user's notification channel.
    Promoted,
    /// The request could not be answered.
    Failed,
}

struct Identified {
    user_id: String,
    session_id: String,
    build_check: Option<(String, BuildCheck)>,
}

/// Drives one accepted connection.
pub struct Connection<S> {
    stream: FramedStream<S>,
    peer: String,
    handler: Arc<RequestHandler>,
    /// User and key the socket is handed over to after an established
    /// notification channel.
    promotion: Option<(String, RsaPublicKey)>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        stream: FramedStream<S>,
        peer: impl Into<String>,
        handler: Arc<RequestHandler>,
    ) -> Self {
        Self {
            stream,
            peer: peer.into(),
            handler,
            promotion: None,
        }
    }

    fn state(&self) -> &Arc<ServerState> {
        self.handler.state()
    }

    fn log(
        &self,
        id: LogEventId,
        level: LogLevel,
        user_id: Option<&str>,
        message: impl Into<String>,
    ) {
        let mut entry = LogEntry::new(id, level, message).ip(&self.peer);
        if let Some(user_id) = user_id {
            entry = entry.user(user_id);
        }
        self.state().event_log().log(entry);
    }

    pub async fn run(mut self) -> ConnectionOutcome {
        let outcome = self.serve().await;

        if let ConnectionOutcome::Promoted = outcome {
            if let Some((user_id, key)) = self.promotion.take() {
                let Connection {
                    stream,
                    peer,
                    handler,
                    ..
                } = self;
                handler
                    .state()
                    .notifications()
                    .start_worker(user_id, key, stream, peer);
                return outcome;
            }
        }

        let _ = self.stream.shutdown().await;
        outcome
    }

    async fn serve(&mut self) -> ConnectionOutcome {
        let Some(identified) = self.receive_identity().await else {
            return ConnectionOutcome::Rejected;
        };
        let user_id = identified.user_id.clone();
        let is_activation = user_id == ACTIVATION_USER_ID;

        let user_key = if is_activation {
            None
        } else {
            match self.state().users().get(&user_id) {
                Some(user) if user.active => match user.public_key() {
                    Ok(key) => Some(key),
                    Err(e) => {
                        self.log(LogEventId::E3, LogLevel::Error, Some(&user_id), e.to_string());
                        return ConnectionOutcome::Rejected;
                    }
                },
                _ => {
                    let text = TextProperty::new(TextKey::LogOnWithInactiveUser).with_arg(&user_id);
                    self.log(LogEventId::W2, LogLevel::Warning, Some(&user_id), text.resolve());
                    return ConnectionOutcome::Rejected;
                }
            }
        };

        let token = if is_activation {
            NULL_UUID.to_string()
        } else {
            Uuid::new_v4().to_string()
        };

        let cached = if is_activation {
            None
        } else {
            self.state().ciphers().lookup(&identified.session_id)
        };

        let compatible = identified
            .build_check
            .as_ref()
            .map(|(_, check)| check.compatible)
            .unwrap_or(true);

        let ciphers = match self
            .acknowledge_and_agree(&identified, user_key.as_ref(), &token, cached, compatible)
            .await
        {
            Ok(ciphers) => ciphers,
            Err(e) => {
                let text = TextProperty::new(TextKey::KeyAgreementFailed).with_arg(&e);
                self.log(LogEventId::E4, LogLevel::Error, Some(&user_id), text.resolve());
                return ConnectionOutcome::Rejected;
            }
        };

        let Some(ciphers) = ciphers else {
            if let Some((client_build, check)) = identified.build_check {
                let text = TextProperty::new(TextKey::IncompatibleBuilds)
                    .with_arg(check.minimum_compatible_build.unwrap_or_default())
                    .with_arg(client_build);
                self.log(LogEventId::V1, LogLevel::Verbose, Some(&user_id), text.resolve());
            }
            return ConnectionOutcome::Rejected;
        };

        let request = match self.receive_request(&ciphers, &token).await {
            Ok(request) => request,
            Err(e) => {
                let text = TextProperty::new(TextKey::RequestDecryptionError).with_arg(&e);
                self.log(LogEventId::E5, LogLevel::Error, Some(&user_id), text.resolve());
                return ConnectionOutcome::Rejected;
            }
        };

        self.answer(user_id, user_key, request, &ciphers).await
    }

    /// Reads the RSA-sealed identity and checks that the user exists.
    async fn receive_identity(&mut self) -> Option<Identified> {
        let private = &self.handler.state().server_keys().private;
        let received = self
            .stream
            .recv_envelope_rsa(private)
            .await
            .and_then(Envelope::into_identity)
            .and_then(|identity| Ok((identity.user_id()?, identity)));

        let (user_id, identity) = match received {
            Ok(received) => received,
            Err(e) => {
                let text = TextProperty::new(TextKey::RequestReceiveError).with_arg(&e);
                self.log(LogEventId::E3, LogLevel::Error, None, text.resolve());
                return None;
            }
        };

        if !self.state().user_exists(&user_id) {
            // The id itself stays out of the log
            let text = TextProperty::new(TextKey::LogOnWithUnknownUser)
                .with_arg(user_id.chars().count());
            self.log(LogEventId::W1, LogLevel::Warning, None, text.resolve());
            return None;
        }

        let build_check = match (self.state().build(), identity.client_build) {
            (Some(_), Some(client_build)) => {
                let check = self.state().app().check_client_build(&client_build);
                Some((client_build, check))
            }
            _ => None,
        };

        tracing::debug!("[{}] Identity {} received", self.peer, user_id);
        Some(Identified {
            user_id,
            session_id: identity.session_id,
            build_check,
        })
    }

    /// Sends the identity acknowledgement and, when the session is not
    /// reusable, runs the key agreement. Returns `None` when the builds are
    /// incompatible.
    async fn acknowledge_and_agree(
        &mut self,
        identified: &Identified,
        user_key: Option<&RsaPublicKey>,
        token: &str,
        cached: Option<Ciphers>,
        compatible: bool,
    ) -> Result<Option<Ciphers>, ProtocolError> {
        if let Some(key) = user_key {
            let ack = UserIdResponse {
                token: token.to_string(),
                session_valid: cached.is_some(),
                build_check: identified.build_check.as_ref().map(|(_, c)| c.clone()),
            };
            let mut info = ResponseInfo::success();
            info.success = compatible;
            let response = ResponseMessage::from_parts(info, Some(Payload::new(&ack)?))
                .with_server_build(self.state().build());
            self.stream
                .send_envelope_rsa(&Envelope::Response(response), key)
                .await?;
        }

        if !compatible {
            return Ok(None);
        }

        match cached {
            Some(ciphers) => {
                tracing::debug!("[{}] Reusing session {}", self.peer, ciphers.session_id);
                Ok(Some(ciphers))
            }
            None => {
                let ciphers = key_agreement_server(&mut self.stream).await?;
                if identified.user_id != ACTIVATION_USER_ID {
                    self.state().ciphers().store(ciphers.clone());
                }
                tracing::debug!("[{}] Session {} established", self.peer, ciphers.session_id);
                Ok(Some(ciphers))
            }
        }
    }

    async fn receive_request(
        &mut self,
        ciphers: &Ciphers,
        token: &str,
    ) -> Result<RequestMessage, ProtocolError> {
        let request = self
            .stream
            .recv_envelope_aes(&ciphers.decrypt)
            .await?
            .into_request()?;
        if request.token != token {
            return Err(ProtocolError::Crypto(
                TextProperty::new(TextKey::InvalidToken).resolve(),
            ));
        }
        Ok(request)
    }

    async fn answer(
        &mut self,
        user_id: String,
        user_key: Option<RsaPublicKey>,
        request: RequestMessage,
        ciphers: &Ciphers,
    ) -> ConnectionOutcome {
        let request_type = request.request_type;
        let request_payload = request.payload.as_ref().map(|p| p.to_string()).unwrap_or_default();
        let mut ctx = RequestContext::new(self.peer.clone(), user_id.clone(), request);

        self.handler.handle(&mut ctx);

        let Some(response) = ctx.take_response() else {
            let serialized = serde_json::to_string(ctx.request()).unwrap_or_default();
            self.state().event_log().log(
                LogEntry::new(
                    LogEventId::C3,
                    LogLevel::Critical,
                    TextProperty::new(TextKey::ResponseMessageNotSet).resolve(),
                )
                .ip(&self.peer)
                .user(&user_id)
                .request(request_type)
                .payload(serialized),
            );
            return ConnectionOutcome::Failed;
        };
        let response = response.with_server_build(self.state().build());

        if let Err(e) = self
            .stream
            .send_envelope_aes(&Envelope::Response(response.clone()), &ciphers.encrypt)
            .await
        {
            let text = TextProperty::new(TextKey::ResponseError).with_arg(&e);
            self.state().event_log().log(
                LogEntry::new(LogEventId::E6, LogLevel::Error, text.resolve())
                    .ip(&self.peer)
                    .user(&user_id)
                    .request(request_type)
                    .payload(serde_json::to_string(&response).unwrap_or_default()),
            );
            // The client never saw the answer, so nothing it asked for is kept
            if let Some(AfterSend::Shutdown) = ctx.take_after_send() {
                self.state().request_shutdown();
            }
            return ConnectionOutcome::Failed;
        }

        self.log_answered(&user_id, request_type, request_payload, &response);

        if request_type == RequestType::EstablishNotificationSocket && response.is_success() {
            if let Some(key) = user_key {
                self.promotion = Some((user_id, key));
                return ConnectionOutcome::Promoted;
            }
        }

        self.after_send(ctx.take_after_send());
        ConnectionOutcome::Answered
    }

    fn log_answered(
        &self,
        user_id: &str,
        request_type: RequestType,
        request_payload: String,
        response: &ResponseMessage,
    ) {
        let (level, message) = if response.is_success() {
            let level = if is_reserved_user_id(user_id) {
                LogLevel::Information
            } else {
                LogLevel::Verbose
            };
            (level, TextProperty::new(TextKey::Ok).resolve())
        } else {
            let message = response
                .info
                .message
                .clone()
                .or_else(|| response.text.as_ref().map(TextProperty::resolve))
                .unwrap_or_default();
            (LogLevel::Warning, message)
        };

        self.state().event_log().log(
            LogEntry::new(LogEventId::I1, level, message)
                .ip(&self.peer)
                .user(user_id)
                .request(request_type)
                .payload(request_payload),
        );
    }

    fn after_send(&self, action: Option<AfterSend>) {
        match action {
            Some(AfterSend::PersistUser(user)) => {
                if let Err(e) = self.state().users().put(&user) {
                    tracing::error!("[{}] Failed to persist user {}: {}", self.peer, user.id, e);
                }
            }
            Some(AfterSend::Shutdown) => self.state().request_shutdown(),
            None => {}
        }
    }
}

//! Client side of one connection: identity, key agreement or session reuse,
//! one request, one response.

use crate::error::ClientError;
use crate::handler::ClientHandler;
use bidi_protocol::types::UserIdResponse;
use bidi_protocol::{
    key_agreement_client, Ciphers, ClientConfiguration, Envelope, FramedStream, Identity, KeyPair,
    Payload, RequestMessage, RequestType, ResponseMessage, TextKey, TextProperty,
    ACTIVATION_USER_ID, NULL_UUID,
};
use rsa::RsaPublicKey;
use std::time::Duration;
use tokio::net::TcpStream;

/// Connection configuration, resolved once from a credential bundle.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub user_id: String,
    pub host: String,
    pub port: u16,
    /// Connect and read timeout.
    pub timeout: Duration,
    /// Absent for the activation identity.
    pub user_keys: Option<KeyPair>,
    pub server_key: RsaPublicKey,
    pub client_build: Option<String>,
}

impl ConnectionConfig {
    pub fn from_bundle(
        bundle: &ClientConfiguration,
        client_build: Option<String>,
    ) -> Result<Self, ClientError> {
        let user_keys = bundle.user_keys()?;
        if user_keys.is_none() && bundle.user_id != ACTIVATION_USER_ID {
            return Err(ClientError::MissingKey(bundle.user_id.clone()));
        }

        Ok(Self {
            user_id: bundle.user_id.clone(),
            host: bundle.url.clone(),
            port: bundle.port,
            timeout: bundle.socket_timeout(),
            user_keys,
            server_key: bundle.server_public_key()?,
            client_build,
        })
    }

    pub fn is_activation(&self) -> bool {
        self.user_id == ACTIVATION_USER_ID
    }
}

/// An open TCP connection to the server.
pub struct Connection {
    stream: FramedStream<TcpStream>,
}

impl Connection {
    /// Connects to the server.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}:{}...", config.host, config.port);

        let tcp_stream = tokio::time::timeout(
            config.timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            ClientError::Timeout
        })??;

        tcp_stream.set_nodelay(true).ok();

        Ok(Self {
            stream: FramedStream::new(tcp_stream).with_timeout(Some(config.timeout)),
        })
    }

    /// Runs the handshake and one request.
    ///
    /// `ciphers` holds the session of earlier exchanges. It is replaced when
    /// the server no longer knows the session and cleared for the activation
    /// identity. A build mismatch is answered locally with a failure
    /// response and nothing is sent after the identity.
    pub async fn exchange(
        &mut self,
        config: &ConnectionConfig,
        handler: &dyn ClientHandler,
        ciphers: &mut Option<Ciphers>,
        request_type: RequestType,
        payload: Option<Payload>,
    ) -> Result<ResponseMessage, ClientError> {
        let activation = config.is_activation();
        if activation {
            *ciphers = None;
        }

        let session_id = ciphers
            .as_ref()
            .map(|c| c.session_id.clone())
            .unwrap_or_else(|| NULL_UUID.to_string());
        let identity = Identity::new(session_id, config.client_build.clone(), &config.user_id)?;
        self.stream
            .send_envelope_rsa(&Envelope::Identity(identity), &config.server_key)
            .await?;

        let token = if activation {
            NULL_UUID.to_string()
        } else {
            let keys = config
                .user_keys
                .as_ref()
                .ok_or_else(|| ClientError::MissingKey(config.user_id.clone()))?;
            let ack = self
                .stream
                .recv_envelope_rsa(&keys.private)
                .await?
                .into_response()?;
            let body: UserIdResponse = ack.payload_as()?;

            if let Some(failure) = check_builds(config, handler, &ack, &body) {
                return Ok(failure);
            }
            if !body.session_valid {
                *ciphers = None;
            }
            body.token
        };

        let session = match ciphers.take() {
            Some(session) => {
                tracing::debug!("Reusing session {}", session.session_id);
                session
            }
            None => {
                let session = key_agreement_client(&mut self.stream).await?;
                tracing::debug!("Session {} established", session.session_id);
                session
            }
        };

        let request = RequestMessage {
            request_type,
            session_id: session.session_id.clone(),
            token,
            client_build: config.client_build.clone(),
            payload,
        };
        let result = self.send_request(request, &session).await;

        if !activation {
            *ciphers = Some(session);
        }
        result
    }

    async fn send_request(
        &mut self,
        request: RequestMessage,
        session: &Ciphers,
    ) -> Result<ResponseMessage, ClientError> {
        tracing::debug!("Sending {} request", request.request_type);
        self.stream
            .send_envelope_aes(&Envelope::Request(request), &session.encrypt)
            .await?;
        let response = self
            .stream
            .recv_envelope_aes(&session.decrypt)
            .await?
            .into_response()?;
        Ok(response)
    }

    /// Hands over the socket, used once it became a notification channel.
    pub fn into_stream(self) -> FramedStream<TcpStream> {
        self.stream
    }

    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Local failure response when either side rejects the other's build.
fn check_builds(
    config: &ConnectionConfig,
    handler: &dyn ClientHandler,
    ack: &ResponseMessage,
    body: &UserIdResponse,
) -> Option<ResponseMessage> {
    let check = body.build_check.as_ref()?;

    if !ack.info.success || !check.compatible {
        let text = TextProperty::new(TextKey::IncompatibleBuilds)
            .with_arg(check.minimum_compatible_build.clone().unwrap_or_default())
            .with_arg(config.client_build.clone().unwrap_or_default());
        return Some(
            ResponseMessage::failure(text).with_server_build(ack.info.server_build.clone()),
        );
    }

    let server_build = ack.info.server_build.as_deref()?;
    let own = handler.check_server_build(server_build);
    if own.compatible {
        return None;
    }
    let text = TextProperty::new(TextKey::ServerBuildOutdated)
        .with_arg(server_build)
        .with_arg(own.minimum_compatible_build.unwrap_or_default());
    Some(ResponseMessage::failure(text).with_server_build(Some(server_build.to_string())))
}

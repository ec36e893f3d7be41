//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use crate::handler::{ClientHandler, DefaultClientHandler};
use crate::receiver;
use bidi_protocol::types::{
    ActivateUserRequest, ChangeUserRequest, ChangeUserResponse, DataSet, DataSetInfo,
    DataSetInfos, LogFile, LogLevel, PushNotificationRequest, ServerStatus, User, Users,
};
use bidi_protocol::{
    crypto, Ciphers, ClientConfiguration, ErrorCode, KeyPair, Payload, PayloadType, RequestType,
    ResponseInfo, ResponseMessage, TextKey, TextProperty, ACTIVATION_USER_ID, ADMIN_USER_ID,
};
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Pause between attempts to open the notification channel.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

/// Result of [`Client::activate_user`].
#[derive(Debug, Clone)]
pub struct Activation {
    /// The activated user's bundle, present on success.
    pub configuration: Option<ClientConfiguration>,
    pub info: ResponseInfo,
}

/// High-level client for one user of one server.
pub struct Client {
    bundle: ClientConfiguration,
    config: ConnectionConfig,
    handler: Arc<dyn ClientHandler>,
    /// Session of the last exchange. Held for the full exchange, which
    /// serializes all requests of this client.
    session: Mutex<Option<Ciphers>>,
    connected: AtomicBool,
    reconnect_interval: Duration,
    reconnect: SyncMutex<Option<JoinHandle<()>>>,
    receiver: SyncMutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Creates a client for the user of `bundle`.
    pub fn new(
        bundle: ClientConfiguration,
        handler: Arc<dyn ClientHandler>,
    ) -> Result<Self, ClientError> {
        let config = ConnectionConfig::from_bundle(&bundle, handler.build())?;
        Ok(Self {
            bundle,
            config,
            handler,
            session: Mutex::new(None),
            connected: AtomicBool::new(false),
            reconnect_interval: RECONNECT_INTERVAL,
            reconnect: SyncMutex::new(None),
            receiver: SyncMutex::new(None),
        })
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.config.user_id
    }

    pub fn configuration(&self) -> &ClientConfiguration {
        &self.bundle
    }

    pub(crate) fn handler(&self) -> &Arc<dyn ClientHandler> {
        &self.handler
    }

    /// Whether the notification channel is up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) != connected {
            tracing::debug!(
                "Notification channel of {} {}",
                self.config.user_id,
                if connected { "up" } else { "down" }
            );
            self.handler.on_connection_status_changed(connected);
        }
    }

    // =========================================================================
    // Transport
    // =========================================================================

    /// Sends one request. Transport problems are reported as failure
    /// responses, never as errors.
    pub async fn request(
        &self,
        request_type: RequestType,
        payload: Option<Payload>,
    ) -> ResponseMessage {
        let mut session = self.session.lock().await;
        match self.exchange(&mut session, request_type, payload).await {
            Ok((response, connection)) => {
                connection.close().await;
                response
            }
            Err(e) => self.transport_failure(request_type, e),
        }
    }

    async fn exchange(
        &self,
        session: &mut Option<Ciphers>,
        request_type: RequestType,
        payload: Option<Payload>,
    ) -> Result<(ResponseMessage, Connection), ClientError> {
        let mut connection = Connection::connect(&self.config).await?;
        let response = connection
            .exchange(&self.config, self.handler.as_ref(), session, request_type, payload)
            .await?;
        Ok((response, connection))
    }

    fn transport_failure(&self, request_type: RequestType, error: ClientError) -> ResponseMessage {
        tracing::debug!("{} request failed: {}", request_type, error);
        let text = match error.error_code() {
            ErrorCode::ConnectionClosed => TextProperty::new(TextKey::ConnectionClosed),
            _ => TextProperty::new(TextKey::NoConnectionToServer).with_arg(&error),
        };
        ResponseMessage::failure(text).with_server_build(self.config.client_build.clone())
    }

    async fn call(
        &self,
        request_type: RequestType,
        payload: Option<Payload>,
    ) -> Result<ResponseMessage, ClientError> {
        let response = self.request(request_type, payload).await;
        if response.is_success() {
            Ok(response)
        } else {
            Err(ClientError::from_info(&response.info))
        }
    }

    async fn call_for<T: PayloadType>(
        &self,
        request_type: RequestType,
        payload: Option<Payload>,
    ) -> Result<T, ClientError> {
        Ok(self.call(request_type, payload).await?.payload_as()?)
    }

    fn text(value: &str) -> Result<Option<Payload>, ClientError> {
        Ok(Some(Payload::new(&value.to_string())?))
    }

    // =========================================================================
    // System operations
    // =========================================================================

    /// Pings the server.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.call(RequestType::Ping, None).await?;
        Ok(())
    }

    pub async fn get_server_status(&self) -> Result<ServerStatus, ClientError> {
        self.call_for(RequestType::GetServerStatus, None).await
    }

    /// Name and content of the server's current log file. Administrator only.
    pub async fn get_log(&self) -> Result<LogFile, ClientError> {
        self.call_for(RequestType::GetLog, None).await
    }

    pub async fn set_log_level(&self, level: LogLevel) -> Result<(), ClientError> {
        self.call(RequestType::SetLogLevel, Some(Payload::new(&level)?))
            .await?;
        Ok(())
    }

    /// Stops the server. Administrator only.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.call(RequestType::Shutdown, None).await?;
        Ok(())
    }

    /// Sends an application-defined request. The response is returned as is.
    pub async fn custom(&self, payload: Option<Payload>) -> ResponseMessage {
        self.request(RequestType::Custom, payload).await
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Creates, updates or renews a user. Administrator only.
    pub async fn change_user(
        &self,
        request: &ChangeUserRequest,
    ) -> Result<ChangeUserResponse, ClientError> {
        self.call_for(RequestType::ChangeUser, Some(Payload::new(request)?))
            .await
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User, ClientError> {
        self.call_for(RequestType::GetUser, Self::text(user_id)?).await
    }

    pub async fn get_users(&self) -> Result<Vec<User>, ClientError> {
        let users: Users = self.call_for(RequestType::GetUsers, None).await?;
        Ok(users.users)
    }

    pub async fn delete_user(&self, user_id: &str) -> Result<(), ClientError> {
        self.call(RequestType::DeleteUser, Self::text(user_id)?).await?;
        Ok(())
    }

    /// Activates the user described by a CHANGE_USER response: generates a
    /// key pair, registers the public key under the activation identity and
    /// returns the user's bundle.
    pub async fn activate_user(
        user: &ChangeUserResponse,
        build: Option<String>,
    ) -> Result<Activation, ClientError> {
        let keys = KeyPair::generate()?;
        let bundle = ClientConfiguration {
            user_id: ACTIVATION_USER_ID.to_string(),
            url: user.server_url.clone(),
            port: user.server_port,
            timeout: 0,
            user_private_key: None,
            server_public_key: user.server_public_key.clone(),
            admin_email: user.admin_email.clone(),
        };
        let handler = Arc::new(DefaultClientHandler::with_build(build));
        let client = Client::new(bundle.clone(), handler)?;

        let request = ActivateUserRequest {
            user_id: user.user_id.clone(),
            activation_code: user.activation_code.clone().unwrap_or_default(),
            user_public_key: crypto::encode_public_key(&keys.public)?,
        };
        let response = client
            .request(RequestType::ActivateUser, Some(Payload::new(&request)?))
            .await;

        let configuration = if response.is_success() {
            Some(ClientConfiguration {
                user_id: user.user_id.clone(),
                user_private_key: Some(keys.private_base64()?),
                ..bundle
            })
        } else {
            None
        };

        Ok(Activation {
            configuration,
            info: response.info,
        })
    }

    // =========================================================================
    // Data sets
    // =========================================================================

    pub async fn get_data_set_infos_of_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<DataSetInfo>, ClientError> {
        let infos: DataSetInfos = self
            .call_for(RequestType::GetDataSetInfosOfUser, Self::text(user_id)?)
            .await?;
        Ok(infos.infos)
    }

    pub async fn create_data_set(&self, data_set: &DataSet) -> Result<(), ClientError> {
        self.call(RequestType::CreateDataSet, Some(Payload::new(data_set)?))
            .await?;
        Ok(())
    }

    pub async fn update_data_set(&self, data_set: &DataSet) -> Result<(), ClientError> {
        self.call(RequestType::UpdateDataSet, Some(Payload::new(data_set)?))
            .await?;
        Ok(())
    }

    pub async fn delete_data_set(&self, data_set_id: &str) -> Result<(), ClientError> {
        self.call(RequestType::DeleteDataSet, Self::text(data_set_id)?)
            .await?;
        Ok(())
    }

    pub async fn get_data_set(&self, data_set_id: &str) -> Result<DataSet, ClientError> {
        self.call_for(RequestType::GetDataSet, Self::text(data_set_id)?)
            .await
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Queues a notification for each recipient. The payload is sealed per
    /// recipient by the server.
    pub async fn push_notification(
        &self,
        recipients: Vec<String>,
        payload: Payload,
    ) -> Result<(), ClientError> {
        let request = PushNotificationRequest { recipients, payload };
        self.call(RequestType::PushNotification, Some(Payload::new(&request)?))
            .await?;
        Ok(())
    }

    /// Confirms a delivered notification, which removes it on the server.
    pub async fn acknowledge(&self, notification_id: &str) -> Result<(), ClientError> {
        self.call(RequestType::PushNotificationReceived, Self::text(notification_id)?)
            .await?;
        Ok(())
    }

    /// Starts keeping a notification channel open. Returns false for the
    /// administrator and activation identities, which never receive
    /// notifications.
    pub fn start(self: &Arc<Self>) -> bool {
        let user_id = self.config.user_id.as_str();
        if user_id == ADMIN_USER_ID || user_id == ACTIVATION_USER_ID {
            return false;
        }

        let mut reconnect = self.reconnect.lock();
        if reconnect.is_none() {
            let client = Arc::downgrade(self);
            *reconnect = Some(tokio::spawn(receiver::reconnect_loop(
                client,
                self.reconnect_interval,
            )));
        }
        true
    }

    /// Opens the notification channel and hands it to a receiver task.
    pub(crate) async fn establish_notification_channel(
        self: &Arc<Self>,
    ) -> Result<(), ClientError> {
        let keys = self
            .config
            .user_keys
            .clone()
            .ok_or_else(|| ClientError::MissingKey(self.config.user_id.clone()))?;

        let mut session = self.session.lock().await;
        let (response, connection) = self
            .exchange(&mut session, RequestType::EstablishNotificationSocket, None)
            .await?;
        drop(session);

        if !response.is_success() {
            connection.close().await;
            return Err(ClientError::from_info(&response.info));
        }

        let task = tokio::spawn(receiver::receive(
            Arc::downgrade(self),
            connection.into_stream(),
            keys.private,
        ));
        if let Some(previous) = self.receiver.lock().replace(task) {
            previous.abort();
        }
        self.set_connected(true);
        Ok(())
    }

    /// Closes the notification channel and stops reconnecting.
    pub async fn disconnect(&self) -> ResponseMessage {
        if let Some(task) = self.reconnect.lock().take() {
            task.abort();
        }

        let response = self.request(RequestType::Disconnect, None).await;

        if let Some(task) = self.receiver.lock().take() {
            task.abort();
        }
        self.set_connected(false);
        response
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(task) = self.reconnect.get_mut().take() {
            task.abort();
        }
        if let Some(task) = self.receiver.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(user_id: &str) -> ClientConfiguration {
        let server = KeyPair::generate().unwrap();
        let user = KeyPair::generate().unwrap();
        ClientConfiguration {
            user_id: user_id.to_string(),
            url: "127.0.0.1".to_string(),
            // Nothing listens on port 1
            port: 1,
            timeout: 2,
            user_private_key: Some(user.private_base64().unwrap()),
            server_public_key: server.public_base64().unwrap(),
            admin_email: String::new(),
        }
    }

    #[test]
    fn test_client_creation() {
        let client = Client::new(bundle("bob"), Arc::new(DefaultClientHandler::new())).unwrap();
        assert_eq!(client.user_id(), "bob");
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_transport_failure_is_a_response() {
        let handler = Arc::new(DefaultClientHandler::with_build(Some("3".into())));
        let client = Client::new(bundle("bob"), handler).unwrap();

        let response = client.request(RequestType::Ping, None).await;
        assert!(!response.is_success());
        assert_eq!(response.code(), Some(ErrorCode::NoConnectionToServer));
        assert_eq!(response.info.server_build.as_deref(), Some("3"));

        let err = client.ping().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_reserved_identities_do_not_listen() {
        let handler = Arc::new(DefaultClientHandler::new());
        let admin = Arc::new(Client::new(bundle(ADMIN_USER_ID), handler).unwrap());
        assert!(!admin.start());

        let user = Arc::new(
            Client::new(bundle("bob"), Arc::new(DefaultClientHandler::new()))
                .unwrap()
                .with_reconnect_interval(Duration::from_secs(60)),
        );
        assert!(user.start());
        assert!(user.start());
        assert!(!user.is_connected());
    }
}

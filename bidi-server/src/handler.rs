//! Request handlers.

use crate::context::{AfterSend, RequestContext};
use crate::error::ServerError;
use crate::event_log::{LogEntry, LogEventId};
use crate::state::ServerState;
use bidi_protocol::crypto;
use bidi_protocol::ident::{check_identifier, invalid_characters_display, is_reserved_user_id};
use bidi_protocol::ident::{IDENTIFIER_MAX_LEN, IDENTIFIER_MIN_LEN};
use bidi_protocol::types::{
    ActivateUserRequest, ChangeUserRequest, ChangeUserResponse, DataSet, LogLevel,
    PushNotificationRequest, ServerStatus, Users,
};
use bidi_protocol::{
    IdentifierCheck, RequestType, ResponseMessage, TextKey, TextProperty, ACTIVATION_USER_ID,
};
use bidi_storage::StoredUser;
use std::sync::Arc;
use uuid::Uuid;

/// Dispatches one request to its handler and makes sure a response is set
/// unless the handler is broken.
pub struct RequestHandler {
    state: Arc<ServerState>,
}

impl RequestHandler {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Handles the request in `ctx`. A failing handler turns into an
    /// `APPLICATION_ERROR` response and a critical log entry.
    pub fn handle(&self, ctx: &mut RequestContext) {
        let request_type = ctx.request_type();

        // Identity-bound requests
        let allowed = if request_type.requires_admin() {
            ctx.is_admin()
        } else if request_type == RequestType::ActivateUser {
            ctx.user_id() == ACTIVATION_USER_ID
        } else {
            true
        };
        if !allowed {
            tracing::debug!(
                "[{}] {} not allowed for {}",
                ctx.peer(),
                request_type,
                ctx.user_id()
            );
            ctx.fail(not_authorized(ctx.user_id()));
            return;
        }

        let result = match request_type {
            RequestType::Ping | RequestType::EstablishNotificationSocket => {
                ctx.respond(ResponseMessage::ok());
                Ok(())
            }
            RequestType::ActivateUser => self.handle_activate_user(ctx),
            RequestType::ChangeUser => self.handle_change_user(ctx),
            RequestType::Shutdown => self.handle_shutdown(ctx),
            RequestType::GetUser => self.handle_get_user(ctx),
            RequestType::GetUsers => self.handle_get_users(ctx),
            RequestType::DeleteUser => self.handle_delete_user(ctx),
            RequestType::GetServerStatus => self.handle_get_server_status(ctx),
            RequestType::GetLog => self.handle_get_log(ctx),
            RequestType::SetLogLevel => self.handle_set_log_level(ctx),
            RequestType::GetDataSetInfosOfUser => self.handle_get_data_set_infos_of_user(ctx),
            RequestType::CreateDataSet => self.handle_set_data_set(ctx, true),
            RequestType::UpdateDataSet => self.handle_set_data_set(ctx, false),
            RequestType::DeleteDataSet => self.handle_delete_data_set(ctx),
            RequestType::GetDataSet => self.handle_get_data_set(ctx),
            RequestType::PushNotification => self.handle_push_notification(ctx),
            RequestType::PushNotificationReceived => self.handle_push_notification_received(ctx),
            RequestType::Disconnect => self.handle_disconnect(ctx),
            RequestType::Custom => self.handle_custom(ctx),
        };

        if let Err(e) = result {
            let serialized = serde_json::to_string(ctx.request()).unwrap_or_default();
            self.state.event_log().log(
                LogEntry::new(
                    LogEventId::C2,
                    LogLevel::Critical,
                    format!("{} failed: {}", request_type, e),
                )
                .ip(ctx.peer())
                .user(ctx.user_id())
                .request(request_type)
                .payload(serialized),
            );
            ctx.override_with_failure(
                TextProperty::new(TextKey::ApplicationError).with_arg(e.error_code()),
            );
        }
    }

    fn handle_activate_user(&self, ctx: &mut RequestContext) -> Result<(), ServerError> {
        let request: ActivateUserRequest = ctx.request().payload_as()?;
        let activation_error =
            || TextProperty::new(TextKey::UserActivationError).with_arg(&request.user_id);

        let mut user = match self.state.users().get(&request.user_id) {
            Some(user) => user,
            None => {
                ctx.fail(activation_error());
                return Ok(());
            }
        };

        if user.active {
            ctx.fail(TextProperty::new(TextKey::UserAlreadyActive).with_arg(&request.user_id));
            return Ok(());
        }

        if user.activation_code.as_deref() != Some(request.activation_code.as_str())
            || crypto::decode_public_key(&request.user_public_key).is_err()
        {
            ctx.fail(activation_error());
            return Ok(());
        }

        user.activate(request.user_public_key.clone());
        ctx.defer(AfterSend::PersistUser(user));
        ctx.respond(ResponseMessage::ok());
        Ok(())
    }

    fn handle_change_user(&self, ctx: &mut RequestContext) -> Result<(), ServerError> {
        let request: ChangeUserRequest = ctx.request().payload_as()?;
        let user_id = request.user_id.as_str();

        let check = check_identifier(user_id);
        if !check.is_ok() {
            ctx.fail(identifier_failure(
                check,
                [
                    TextKey::UserIdTooShort,
                    TextKey::UserIdTooLong,
                    TextKey::UserIdInvalidCharacters,
                ],
            ));
            return Ok(());
        }

        if is_reserved_user_id(user_id) {
            ctx.fail(TextProperty::new(TextKey::UserIdReserved).with_arg(user_id));
            return Ok(());
        }

        let existing = self.state.users().get(user_id);
        match (&existing, request.create) {
            (Some(_), true) => {
                ctx.fail(TextProperty::new(TextKey::UserIdExists).with_arg(user_id));
                return Ok(());
            }
            (None, false) => {
                ctx.fail(TextProperty::new(TextKey::UserIdNotExists).with_arg(user_id));
                return Ok(());
            }
            _ => {}
        }

        let mut user = existing.unwrap_or_else(|| {
            StoredUser::pending(
                user_id,
                request.name.clone(),
                request.custom_data.clone(),
                String::new(),
            )
        });

        if request.create || request.renew_credentials {
            user.reset_credentials(Uuid::new_v4().to_string());
        } else {
            user.name = request.name.clone();
            user.custom_data = request.custom_data.clone();
        }

        let config = self.state.config();
        let response = ChangeUserResponse {
            user_id: user.id.clone(),
            activation_code: user.activation_code.clone(),
            server_url: config.network.url.clone(),
            server_port: config.network.bind_addr.port(),
            admin_email: config.server.admin_email.clone(),
            server_public_key: self.state.server_keys().public_base64()?,
        };

        ctx.defer(AfterSend::PersistUser(user));
        ctx.respond(ResponseMessage::ok_with(&response)?);
        Ok(())
    }

    fn handle_shutdown(&self, ctx: &mut RequestContext) -> Result<(), ServerError> {
        tracing::info!("[{}] Shutdown requested by {}", ctx.peer(), ctx.user_id());
        ctx.defer(AfterSend::Shutdown);
        ctx.respond(ResponseMessage::ok());
        Ok(())
    }

    fn handle_get_user(&self, ctx: &mut RequestContext) -> Result<(), ServerError> {
        let user_id: String = ctx.request().payload_as()?;

        match self.state.get_user(&user_id) {
            Some(user) if !is_reserved_user_id(&user_id) => {
                ctx.respond(ResponseMessage::ok_with(&user)?);
            }
            _ => ctx.fail(TextProperty::new(TextKey::UserIdNotExists).with_arg(&user_id)),
        }
        Ok(())
    }

    fn handle_get_users(&self, ctx: &mut RequestContext) -> Result<(), ServerError> {
        let users = Users {
            users: self.state.get_users(),
        };
        ctx.respond(ResponseMessage::ok_with(&users)?);
        Ok(())
    }

    fn handle_delete_user(&self, ctx: &mut RequestContext) -> Result<(), ServerError> {
        let user_id: String = ctx.request().payload_as()?;

        if !self.state.users().contains(&user_id) {
            ctx.fail(TextProperty::new(TextKey::UserIdNotExists).with_arg(&user_id));
            return Ok(());
        }
        if is_reserved_user_id(&user_id) {
            ctx.fail(TextProperty::new(TextKey::UserCannotBeDeleted).with_arg(&user_id));
            return Ok(());
        }

        self.state.delete_user(&user_id)?;
        tracing::info!("[{}] User {} deleted", ctx.peer(), user_id);
        ctx.respond(ResponseMessage::ok());
        Ok(())
    }

    fn handle_get_server_status(&self, ctx: &mut RequestContext) -> Result<(), ServerError> {
        let status = ServerStatus {
            server_start_date: self.state.started_at(),
            log_size_bytes: self.state.event_log().size(),
            log_level: self.state.log_level(),
            build: self.state.build(),
        };
        ctx.respond(ResponseMessage::ok_with(&status)?);
        Ok(())
    }

    fn handle_get_log(&self, ctx: &mut RequestContext) -> Result<(), ServerError> {
        let log = self.state.event_log().get_log()?;
        ctx.respond(ResponseMessage::ok_with(&log)?);
        Ok(())
    }

    fn handle_set_log_level(&self, ctx: &mut RequestContext) -> Result<(), ServerError> {
        let level: LogLevel = ctx.request().payload_as()?;
        self.state.set_log_level(level);
        tracing::info!("[{}] Log level set to {}", ctx.peer(), level.as_str());
        ctx.respond(ResponseMessage::ok());
        Ok(())
    }

    fn handle_get_data_set_infos_of_user(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<(), ServerError> {
        let user_id: String = ctx.request().payload_as()?;
        let infos = self.state.data_set_infos_of_user(&user_id);
        ctx.respond(ResponseMessage::ok_with(&infos)?);
        Ok(())
    }

    /// Create and update share the data lock with the existence check, so
    /// of two concurrent creates of one id exactly one wins.
    fn handle_set_data_set(
        &self,
        ctx: &mut RequestContext,
        create: bool,
    ) -> Result<(), ServerError> {
        let data_set: DataSet = ctx.request().payload_as()?;
        let mut locked = self.state.data_sets().lock();
        let exists = locked.contains(&data_set.id);

        if create && exists {
            ctx.fail(TextProperty::new(TextKey::DataSetIdExists).with_arg(&data_set.id));
            return Ok(());
        }
        if !create {
            if !exists {
                ctx.fail(TextProperty::new(TextKey::DataSetIdNotExists).with_arg(&data_set.id));
                return Ok(());
            }
            // Checked against the submitted member list
            if !data_set.is_authorized(ctx.user_id()) {
                ctx.fail(
                    TextProperty::new(TextKey::DataSetUserNotAuthorizedUpdate)
                        .with_arg(ctx.user_id())
                        .with_arg(&data_set.id),
                );
                return Ok(());
            }
        }

        let check = self.state.write_data_set(&mut locked, &data_set)?;
        drop(locked);

        if !check.is_ok() {
            ctx.fail(identifier_failure(
                check,
                [
                    TextKey::DataSetIdTooShort,
                    TextKey::DataSetIdTooLong,
                    TextKey::DataSetIdInvalidCharacters,
                ],
            ));
            return Ok(());
        }

        ctx.respond(ResponseMessage::ok());
        Ok(())
    }

    fn handle_delete_data_set(&self, ctx: &mut RequestContext) -> Result<(), ServerError> {
        let data_set_id: String = ctx.request().payload_as()?;
        let mut locked = self.state.data_sets().lock();

        if locked.contains(&data_set_id) {
            if let Some(data_set) = locked.read(&data_set_id)? {
                if !data_set.is_authorized(ctx.user_id()) {
                    ctx.fail(
                        TextProperty::new(TextKey::DataSetUserNotAuthorizedDelete)
                            .with_arg(ctx.user_id())
                            .with_arg(&data_set_id),
                    );
                    return Ok(());
                }
            }
            locked.remove(&data_set_id)?;
        }

        ctx.respond(ResponseMessage::ok());
        Ok(())
    }

    fn handle_get_data_set(&self, ctx: &mut RequestContext) -> Result<(), ServerError> {
        let data_set_id: String = ctx.request().payload_as()?;
        let data_set = self.state.data_sets().lock().read(&data_set_id)?;

        match data_set {
            None => ctx.fail(TextProperty::new(TextKey::DataSetIdNotExists).with_arg(&data_set_id)),
            Some(data_set) if !data_set.is_authorized(ctx.user_id()) => ctx.fail(
                TextProperty::new(TextKey::DataSetUserNotAuthorized)
                    .with_arg(ctx.user_id())
                    .with_arg(&data_set_id),
            ),
            Some(data_set) => ctx.respond(ResponseMessage::ok_with(&data_set)?),
        }
        Ok(())
    }

    fn handle_push_notification(&self, ctx: &mut RequestContext) -> Result<(), ServerError> {
        let request: PushNotificationRequest = ctx.request().payload_as()?;
        let delivered = self.state.push_notification(ctx.user_id(), &request)?;
        tracing::debug!(
            "[{}] Notification from {} queued for {} of {} recipients",
            ctx.peer(),
            ctx.user_id(),
            delivered,
            request.recipients.len()
        );
        ctx.respond(ResponseMessage::ok());
        Ok(())
    }

    fn handle_push_notification_received(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<(), ServerError> {
        let notification_id: String = ctx.request().payload_as()?;
        self.state
            .notifications()
            .acknowledge(ctx.user_id(), &notification_id)?;
        ctx.respond(ResponseMessage::ok());
        Ok(())
    }

    fn handle_disconnect(&self, ctx: &mut RequestContext) -> Result<(), ServerError> {
        if self.state.notifications().stop_worker(ctx.user_id()) {
            tracing::debug!("[{}] Notification channel of {} closed", ctx.peer(), ctx.user_id());
        }
        ctx.respond(ResponseMessage::ok());
        Ok(())
    }

    fn handle_custom(&self, ctx: &mut RequestContext) -> Result<(), ServerError> {
        let (info, payload) = self.state.app().on_custom_request(
            &self.state,
            ctx.user_id(),
            ctx.request().payload.as_ref(),
        )?;
        ctx.respond(ResponseMessage::from_parts(info, payload));
        Ok(())
    }
}

fn not_authorized(user_id: &str) -> TextProperty {
    TextProperty::new(TextKey::NotAuthorized).with_arg(user_id)
}

/// Maps a failed identifier check to its message, given the keys for
/// too short, too long and invalid characters.
fn identifier_failure(check: IdentifierCheck, keys: [TextKey; 3]) -> TextProperty {
    match check {
        IdentifierCheck::TooShort => TextProperty::new(keys[0]).with_arg(IDENTIFIER_MIN_LEN),
        IdentifierCheck::TooLong => TextProperty::new(keys[1]).with_arg(IDENTIFIER_MAX_LEN),
        IdentifierCheck::InvalidCharacters | IdentifierCheck::Ok => {
            TextProperty::new(keys[2]).with_arg(invalid_characters_display())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Application, CustomResponse};
    use crate::config::Config;
    use bidi_protocol::types::{DataSetInfos, User};
    use bidi_protocol::{ErrorCode, KeyPair, Payload, RequestMessage, ResponseInfo, ADMIN_USER_ID};
    use tempfile::TempDir;

    struct Echo;

    impl Application for Echo {
        fn build(&self) -> Option<String> {
            Some("7".into())
        }

        fn on_custom_request(
            &self,
            _state: &ServerState,
            user_id: &str,
            payload: Option<&Payload>,
        ) -> Result<CustomResponse, ServerError> {
            match payload {
                Some(payload) => Ok((ResponseInfo::success(), Some(payload.clone()))),
                None => Err(ServerError::Application(format!("nothing from {}", user_id))),
            }
        }
    }

    fn handler(home: &TempDir) -> RequestHandler {
        let mut config = Config::default();
        config.storage.home_dir = home.path().to_path_buf();
        let state = ServerState::open(config, Arc::new(Echo)).unwrap();
        RequestHandler::new(Arc::new(state))
    }

    fn run(
        handler: &RequestHandler,
        user_id: &str,
        request_type: RequestType,
        payload: Option<Payload>,
    ) -> RequestContext {
        let mut request = RequestMessage::new(request_type);
        request.payload = payload;
        let mut ctx = RequestContext::new("127.0.0.1:9", user_id, request);
        handler.handle(&mut ctx);
        ctx
    }

    fn code(ctx: &RequestContext) -> Option<ErrorCode> {
        ctx.response().and_then(|r| r.code())
    }

    fn string(value: &str) -> Option<Payload> {
        Some(Payload::new(&value.to_string()).unwrap())
    }

    fn add_active_user(handler: &RequestHandler, id: &str) {
        let keys = KeyPair::generate().unwrap();
        let mut user = StoredUser::pending(id, id, Default::default(), "code");
        user.activate(keys.public_base64().unwrap());
        handler.state().users().put(&user).unwrap();
    }

    #[test]
    fn test_admin_only_requests() {
        let home = TempDir::new().unwrap();
        let handler = handler(&home);
        add_active_user(&handler, "bob");

        for request_type in [
            RequestType::ChangeUser,
            RequestType::DeleteUser,
            RequestType::GetLog,
            RequestType::SetLogLevel,
            RequestType::Shutdown,
        ] {
            let mut ctx = run(&handler, "bob", request_type, string("x"));
            assert_eq!(code(&ctx), Some(ErrorCode::NotAuthorized), "{}", request_type);
            assert_eq!(ctx.take_after_send(), None);
        }

        let ctx = run(&handler, "bob", RequestType::ActivateUser, None);
        assert_eq!(code(&ctx), Some(ErrorCode::NotAuthorized));
    }

    #[test]
    fn test_change_user_then_activate() {
        let home = TempDir::new().unwrap();
        let handler = handler(&home);

        let request = ChangeUserRequest {
            user_id: "bob".into(),
            name: "Bob".into(),
            create: true,
            ..Default::default()
        };
        let mut ctx = run(
            &handler,
            ADMIN_USER_ID,
            RequestType::ChangeUser,
            Some(Payload::new(&request).unwrap()),
        );
        let response: ChangeUserResponse = ctx.take_response().unwrap().payload_as().unwrap();
        let code_issued = response.activation_code.clone().unwrap();
        assert_eq!(response.server_port, 56084);

        // Not persisted until after the response is sent
        assert!(!handler.state().users().contains("bob"));
        match ctx.take_after_send() {
            Some(AfterSend::PersistUser(user)) => handler.state().users().put(&user).unwrap(),
            other => panic!("unexpected {:?}", other),
        }

        let keys = KeyPair::generate().unwrap();
        let activate = |code: &str| ActivateUserRequest {
            user_id: "bob".into(),
            activation_code: code.into(),
            user_public_key: keys.public_base64().unwrap(),
        };

        let ctx = run(
            &handler,
            ACTIVATION_USER_ID,
            RequestType::ActivateUser,
            Some(Payload::new(&activate("wrong")).unwrap()),
        );
        assert_eq!(code(&ctx), Some(ErrorCode::UserActivationError));

        let mut ctx = run(
            &handler,
            ACTIVATION_USER_ID,
            RequestType::ActivateUser,
            Some(Payload::new(&activate(&code_issued)).unwrap()),
        );
        assert!(ctx.response().unwrap().is_success());
        let Some(AfterSend::PersistUser(user)) = ctx.take_after_send() else {
            panic!("activation must persist the user");
        };
        assert!(user.active);
        handler.state().users().put(&user).unwrap();

        let ctx = run(
            &handler,
            ACTIVATION_USER_ID,
            RequestType::ActivateUser,
            Some(Payload::new(&activate(&code_issued)).unwrap()),
        );
        assert_eq!(code(&ctx), Some(ErrorCode::UserAlreadyActive));
    }

    #[test]
    fn test_change_user_validation() {
        let home = TempDir::new().unwrap();
        let handler = handler(&home);
        add_active_user(&handler, "bob");

        let change = |id: &str, create: bool| {
            let request = ChangeUserRequest {
                user_id: id.into(),
                create,
                ..Default::default()
            };
            let ctx = run(
                &handler,
                ADMIN_USER_ID,
                RequestType::ChangeUser,
                Some(Payload::new(&request).unwrap()),
            );
            code(&ctx)
        };

        assert_eq!(change("", true), Some(ErrorCode::UserIdTooShort));
        assert_eq!(change(&"x".repeat(256), true), Some(ErrorCode::UserIdTooLong));
        assert_eq!(change("a.b", true), Some(ErrorCode::UserIdInvalidCharacters));
        assert_eq!(change("my_ADMIN", true), Some(ErrorCode::UserIdReserved));
        assert_eq!(change("bob", true), Some(ErrorCode::UserIdExists));
        assert_eq!(change("carl", false), Some(ErrorCode::UserIdNotExists));
        assert_eq!(change("bob", false), None);
    }

    #[test]
    fn test_users_queries() {
        let home = TempDir::new().unwrap();
        let handler = handler(&home);
        add_active_user(&handler, "bob");

        let ctx = run(&handler, "bob", RequestType::GetUsers, None);
        let users: Users = ctx.response().unwrap().payload_as().unwrap();
        assert_eq!(users.users.len(), 1);
        assert_eq!(users.users[0].id, "bob");

        let ctx = run(&handler, "bob", RequestType::GetUser, string("bob"));
        let user: User = ctx.response().unwrap().payload_as().unwrap();
        assert!(user.active);

        let ctx = run(&handler, "bob", RequestType::GetUser, string(ADMIN_USER_ID));
        assert_eq!(code(&ctx), Some(ErrorCode::UserIdNotExists));

        let ctx = run(&handler, ADMIN_USER_ID, RequestType::DeleteUser, string(ADMIN_USER_ID));
        assert_eq!(code(&ctx), Some(ErrorCode::UserCannotBeDeleted));
        let ctx = run(&handler, ADMIN_USER_ID, RequestType::DeleteUser, string("nobody"));
        assert_eq!(code(&ctx), Some(ErrorCode::UserIdNotExists));
        let ctx = run(&handler, ADMIN_USER_ID, RequestType::DeleteUser, string("bob"));
        assert!(ctx.response().unwrap().is_success());
        assert!(!handler.state().users().contains("bob"));
    }

    #[test]
    fn test_data_set_authorization() {
        let home = TempDir::new().unwrap();
        let handler = handler(&home);
        let ds = |members: &[&str]| {
            Some(
                Payload::new(&DataSet::new(
                    "g1",
                    members.iter().map(|m| m.to_string()),
                ))
                .unwrap(),
            )
        };

        let ctx = run(&handler, "alice", RequestType::CreateDataSet, ds(&["alice"]));
        assert!(ctx.response().unwrap().is_success());
        let ctx = run(&handler, "alice", RequestType::CreateDataSet, ds(&["alice"]));
        assert_eq!(code(&ctx), Some(ErrorCode::DataSetIdExists));

        let ctx = run(&handler, "bob", RequestType::GetDataSet, string("g1"));
        assert_eq!(code(&ctx), Some(ErrorCode::DataSetNotAuthorized));
        let ctx = run(&handler, ADMIN_USER_ID, RequestType::GetDataSet, string("g1"));
        assert!(ctx.response().unwrap().is_success());
        let ctx = run(&handler, "bob", RequestType::GetDataSet, string("g2"));
        assert_eq!(code(&ctx), Some(ErrorCode::DataSetIdNotExists));

        let ctx = run(&handler, "bob", RequestType::UpdateDataSet, ds(&["alice"]));
        assert_eq!(code(&ctx), Some(ErrorCode::DataSetNotAuthorizedUpdate));
        let ctx = run(&handler, "alice", RequestType::UpdateDataSet, ds(&["alice", "bob"]));
        assert!(ctx.response().unwrap().is_success());

        let ctx = run(&handler, "bob", RequestType::GetDataSetInfosOfUser, string("bob"));
        let infos: DataSetInfos = ctx.response().unwrap().payload_as().unwrap();
        assert_eq!(infos.infos.len(), 1);

        let ctx = run(&handler, "carl", RequestType::DeleteDataSet, string("g1"));
        assert_eq!(code(&ctx), Some(ErrorCode::DataSetNotAuthorizedDelete));
        let ctx = run(&handler, "bob", RequestType::DeleteDataSet, string("g1"));
        assert!(ctx.response().unwrap().is_success());
        let ctx = run(&handler, "bob", RequestType::DeleteDataSet, string("g1"));
        assert!(ctx.response().unwrap().is_success());
    }

    #[test]
    fn test_invalid_data_set_id() {
        let home = TempDir::new().unwrap();
        let handler = handler(&home);
        let payload = Payload::new(&DataSet::new("a|b", ["alice".to_string()])).unwrap();
        let ctx = run(&handler, "alice", RequestType::CreateDataSet, Some(payload));
        assert_eq!(code(&ctx), Some(ErrorCode::DataSetIdInvalidCharacters));
    }

    #[test]
    fn test_custom_request_and_handler_failure() {
        let home = TempDir::new().unwrap();
        let handler = handler(&home);

        let ctx = run(&handler, "bob", RequestType::Custom, string("move"));
        let echoed: String = ctx.response().unwrap().payload_as().unwrap();
        assert_eq!(echoed, "move");

        let ctx = run(&handler, "bob", RequestType::Custom, None);
        let response = ctx.response().unwrap();
        assert_eq!(response.code(), Some(ErrorCode::ApplicationError));
        assert_eq!(response.text_key(), Some(TextKey::ApplicationError));

        let log = handler.state().event_log().get_log().unwrap();
        assert!(log.content.contains("\tC2\t"));
        assert!(!response.info.message.clone().unwrap().contains("nothing from"));
    }

    #[test]
    fn test_status_and_log_level() {
        let home = TempDir::new().unwrap();
        let handler = handler(&home);

        let level = Some(Payload::new(&LogLevel::Verbose).unwrap());
        let ctx = run(&handler, ADMIN_USER_ID, RequestType::SetLogLevel, level);
        assert!(ctx.response().unwrap().is_success());

        let ctx = run(&handler, "bob", RequestType::GetServerStatus, None);
        let status: ServerStatus = ctx.response().unwrap().payload_as().unwrap();
        assert_eq!(status.log_level, LogLevel::Verbose);
        assert_eq!(status.build.as_deref(), Some("7"));
    }
}

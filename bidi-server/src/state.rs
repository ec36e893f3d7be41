//! Everything one server instance owns: stores, caches, the event log and
//! the application hooks.

use crate::app::Application;
use crate::bootstrap::{self, AdminBootstrap};
use crate::ciphers::CipherCache;
use crate::config::Config;
use crate::error::ServerError;
use crate::event_log::{EventLog, LogEventId};
use crate::notify::NotificationHub;
use bidi_protocol::ident::{check_identifier, is_reserved_user_id};
use bidi_protocol::types::{
    DataSet, DataSetInfo, DataSetInfos, LogLevel, PushNotificationRequest, User,
};
use bidi_protocol::{IdentifierCheck, KeyPair, Notification, Payload, ACTIVATION_USER_ID};
use bidi_storage::{DataSetStore, LockedDataSets, NotificationStore, ServerDataLayout, UserStore};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct ServerState {
    config: RwLock<Config>,
    layout: ServerDataLayout,
    server_keys: KeyPair,
    users: UserStore,
    data_sets: DataSetStore,
    notifications: Arc<NotificationHub>,
    event_log: Arc<EventLog>,
    ciphers: CipherCache,
    app: Arc<dyn Application>,
    started_at: i64,
    shutdown: broadcast::Sender<()>,
}

impl ServerState {
    /// Opens the server data below the configured home directory, creating
    /// the folder tree, the server keys and the administrator on first
    /// start.
    pub fn open(config: Config, app: Arc<dyn Application>) -> Result<Self, ServerError> {
        let layout = ServerDataLayout::create(&config.storage.home_dir)?;
        let event_log = Arc::new(EventLog::create(layout.logs_dir(), config.server.log_level)?);
        let server_keys = bootstrap::load_or_create_server_keys(&layout)?;

        let users = UserStore::open(layout.users_dir())?;
        tracing::info!("Loaded {} users", users.len());

        bootstrap::ensure_admin(
            &layout,
            &users,
            &server_keys,
            AdminBootstrap {
                url: &config.network.url,
                port: config.network.bind_addr.port(),
                admin_email: &config.server.admin_email,
            },
        )?;

        let data_sets = DataSetStore::open(layout.data_sets_dir())?;
        let notifications = Arc::new(NotificationHub::new(
            NotificationStore::open(layout.notifications_dir())?,
            Arc::clone(&event_log),
        ));
        let ciphers = CipherCache::new(
            config.sessions.inactivity_limit(),
            config.sessions.validity_limit(),
        );
        let (shutdown, _) = broadcast::channel(1);

        let state = Self {
            config: RwLock::new(config),
            layout,
            server_keys,
            users,
            data_sets,
            notifications,
            event_log,
            ciphers,
            app,
            started_at: chrono::Utc::now().timestamp_millis(),
            shutdown,
        };
        state.load_data_sets()?;
        Ok(state)
    }

    /// Reads every data set, migrates payloads written by older builds and
    /// derives the in-memory infos.
    fn load_data_sets(&self) -> Result<(), ServerError> {
        let mut locked = self.data_sets.lock();
        let mut migrated = 0;

        for mut data_set in self.data_sets.load_all()? {
            let upgrade = data_set.payload.as_ref().and_then(|payload| {
                let json = payload.json()?;
                let new_json = self.app.migrate_data_set(payload.tag(), json)?;
                Some(Payload::raw(payload.tag(), new_json))
            });

            if let Some(payload) = upgrade {
                data_set.payload = Some(payload);
                let info = self.info_of(&data_set, None);
                locked.write(&data_set, info)?;
                migrated += 1;
            } else {
                locked.set_info(self.info_of(&data_set, None));
            }
        }

        tracing::info!("Loaded {} data sets ({} migrated)", locked.len(), migrated);
        Ok(())
    }

    pub fn app(&self) -> &dyn Application {
        self.app.as_ref()
    }

    pub fn build(&self) -> Option<String> {
        self.app.build()
    }

    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    pub fn layout(&self) -> &ServerDataLayout {
        &self.layout
    }

    pub fn server_keys(&self) -> &KeyPair {
        &self.server_keys
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub fn data_sets(&self) -> &DataSetStore {
        &self.data_sets
    }

    pub fn notifications(&self) -> &Arc<NotificationHub> {
        &self.notifications
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn ciphers(&self) -> &CipherCache {
        &self.ciphers
    }

    /// Server start, milliseconds since the epoch.
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// The activation identity always exists.
    pub fn user_exists(&self, user_id: &str) -> bool {
        user_id == ACTIVATION_USER_ID || self.users.contains(user_id)
    }

    pub fn get_user(&self, user_id: &str) -> Option<User> {
        self.users.get(user_id).map(|u| u.to_public())
    }

    /// All users except the reserved identities, sorted by id.
    pub fn get_users(&self) -> Vec<User> {
        self.users.list_public()
    }

    /// Removes a user with everything that refers to it: data set
    /// memberships, queued notifications and the live channel.
    pub fn delete_user(&self, user_id: &str) -> Result<bool, ServerError> {
        {
            let mut locked = self.data_sets.lock();
            if !self.users.delete(user_id)? {
                return Ok(false);
            }
            for id in locked.ids() {
                let member = locked
                    .info(&id)
                    .map(|info| info.user_ids.contains(user_id))
                    .unwrap_or(false);
                if !member {
                    continue;
                }
                if let Some(mut data_set) = locked.read(&id)? {
                    data_set.user_ids.remove(user_id);
                    self.write_data_set(&mut locked, &data_set)?;
                }
            }
        }

        self.notifications.store().delete_all(user_id)?;
        self.notifications.stop_worker(user_id);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Data sets
    // ------------------------------------------------------------------

    /// Builds the in-memory info of a data set through the application hook.
    pub fn info_of(&self, data_set: &DataSet, current: Option<&DataSetInfo>) -> DataSetInfo {
        DataSetInfo {
            id: data_set.id.clone(),
            user_ids: data_set.user_ids.clone(),
            payload: self.app.data_set_info_payload(
                &data_set.id,
                &data_set.user_ids,
                data_set.payload.as_ref(),
                current.and_then(|c| c.payload.as_ref()),
            ),
        }
    }

    pub fn data_set_exists(&self, id: &str) -> bool {
        self.data_sets.lock().contains(id)
    }

    pub fn get_data_set(&self, id: &str) -> Result<Option<DataSet>, ServerError> {
        Ok(self.data_sets.lock().read(id)?)
    }

    pub fn get_data_set_info(&self, id: &str) -> Option<DataSetInfo> {
        self.data_sets.lock().info(id)
    }

    pub fn data_set_infos_of_user(&self, user_id: &str) -> DataSetInfos {
        DataSetInfos {
            infos: self.data_sets.lock().infos_of_user(user_id),
        }
    }

    /// Creates or replaces a data set without any authorization check.
    pub fn set_data_set(&self, data_set: &DataSet) -> Result<IdentifierCheck, ServerError> {
        let mut locked = self.data_sets.lock();
        self.write_data_set(&mut locked, data_set)
    }

    /// Writes a data set while the caller holds the data lock.
    pub fn write_data_set(
        &self,
        locked: &mut LockedDataSets<'_>,
        data_set: &DataSet,
    ) -> Result<IdentifierCheck, ServerError> {
        let check = check_identifier(&data_set.id);
        if !check.is_ok() {
            return Ok(check);
        }
        let info = self.info_of(data_set, locked.info(&data_set.id).as_ref());
        locked.write(data_set, info)?;
        Ok(IdentifierCheck::Ok)
    }

    pub fn delete_data_set(&self, id: &str) -> Result<bool, ServerError> {
        Ok(self.data_sets.lock().remove(id)?)
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Sends a notification to every recipient that exists, is active and is
    /// not a reserved identity. Returns the number of recipients served.
    pub fn push_notification(
        &self,
        sender: &str,
        request: &PushNotificationRequest,
    ) -> Result<usize, ServerError> {
        let mut delivered = 0;
        for recipient in &request.recipients {
            if is_reserved_user_id(recipient) {
                continue;
            }
            let user = match self.users.get(recipient) {
                Some(user) if user.active => user,
                _ => continue,
            };
            let key = user.public_key()?;
            let notification = Notification::new(
                sender,
                request.recipients.clone(),
                request.payload.clone(),
                &key,
            )?;
            self.notifications.push(recipient, notification)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    // ------------------------------------------------------------------
    // Runtime settings
    // ------------------------------------------------------------------

    pub fn log_level(&self) -> LogLevel {
        self.event_log.level()
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.event_log.set_level(level);
        let config = {
            let mut config = self.config.write();
            config.server.log_level = level;
            config.clone()
        };
        self.app.on_configuration_updated(&config);
    }

    /// Writes an application message to the event log.
    pub fn log_custom(&self, level: LogLevel, message: impl Into<String>) {
        self.event_log.message(LogEventId::Custom, level, message);
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Closes every notification channel and stops the server.
    pub fn request_shutdown(&self) {
        self.notifications.stop_all();
        let _ = self.shutdown.send(());
    }
}

//! The `ServerData` folder below the server's home directory.

use crate::error::StorageError;
use std::fs;
use std::path::{Path, PathBuf};

pub const ROOT_FOLDER: &str = "ServerData";
pub const LOGS_FOLDER: &str = "Logs";
pub const USERS_FOLDER: &str = "Users";
pub const DATA_SETS_FOLDER: &str = "DataSets";
pub const NOTIFICATIONS_FOLDER: &str = "Notifications";

/// File holding the server's RSA identity.
pub const SERVER_KEYS_FILE: &str = "server.json";

#[derive(Debug, Clone)]
pub struct ServerDataLayout {
    root: PathBuf,
}

impl ServerDataLayout {
    /// Creates the folder tree below `home` if it does not exist yet.
    pub fn create(home: impl AsRef<Path>) -> Result<Self, StorageError> {
        let layout = Self {
            root: home.as_ref().join(ROOT_FOLDER),
        };
        for dir in [
            layout.root.clone(),
            layout.logs_dir(),
            layout.users_dir(),
            layout.data_sets_dir(),
            layout.notifications_dir(),
        ] {
            if !dir.exists() {
                fs::create_dir_all(&dir)?;
                tracing::info!("Created folder {}", dir.display());
            }
        }
        Ok(layout)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_FOLDER)
    }

    pub fn users_dir(&self) -> PathBuf {
        self.root.join(USERS_FOLDER)
    }

    pub fn data_sets_dir(&self) -> PathBuf {
        self.root.join(DATA_SETS_FOLDER)
    }

    pub fn notifications_dir(&self) -> PathBuf {
        self.root.join(NOTIFICATIONS_FOLDER)
    }

    pub fn server_keys_path(&self) -> PathBuf {
        self.root.join(SERVER_KEYS_FILE)
    }
}

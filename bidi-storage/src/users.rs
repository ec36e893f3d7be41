//! User records, one JSON file per user, mirrored in an in-memory index.

use crate::error::StorageError;
use bidi_protocol::crypto;
use bidi_protocol::ident::{check_identifier, is_reserved_user_id, is_user_id_valid};
use bidi_protocol::types::User;
use bidi_protocol::ADMIN_USER_ID;
use parking_lot::RwLock;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// A user as persisted by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub custom_data: BTreeMap<String, String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_code: Option<String>,
    /// Base64 DER public key, set on activation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_public_key: Option<String>,
}

impl StoredUser {
    /// A fresh, inactive user waiting for activation.
    pub fn pending(
        id: impl Into<String>,
        name: impl Into<String>,
        custom_data: BTreeMap<String, String>,
        activation_code: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            custom_data,
            active: false,
            activation_code: Some(activation_code.into()),
            user_public_key: None,
        }
    }

    /// Drops the key and issues a new activation code.
    pub fn reset_credentials(&mut self, activation_code: impl Into<String>) {
        self.active = false;
        self.activation_code = Some(activation_code.into());
        self.user_public_key = None;
    }

    /// Marks the user active with the given public key.
    pub fn activate(&mut self, public_key: impl Into<String>) {
        self.active = true;
        self.activation_code = None;
        self.user_public_key = Some(public_key.into());
    }

    pub fn public_key(&self) -> Result<RsaPublicKey, StorageError> {
        let encoded = self.user_public_key.as_deref().ok_or_else(|| {
            StorageError::Corruption(format!("user {} has no public key", self.id))
        })?;
        Ok(crypto::decode_public_key(encoded)?)
    }

    /// The view handed out to clients, without credentials.
    pub fn to_public(&self) -> User {
        User {
            id: self.id.clone(),
            name: self.name.clone(),
            custom_data: self.custom_data.clone(),
            active: self.active,
        }
    }
}

/// File-backed user store.
pub struct UserStore {
    dir: PathBuf,
    users: RwLock<HashMap<String, StoredUser>>,
}

impl UserStore {
    /// Opens the store and loads every user file in `dir`.
    ///
    /// Files whose names are neither the administrator nor a valid user id
    /// are ignored.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut users = HashMap::new();
        for name in crate::sorted_file_names(&dir)? {
            if name != ADMIN_USER_ID && !is_user_id_valid(&name) {
                continue;
            }
            match crate::read_json::<StoredUser>(&dir.join(&name)) {
                Ok(user) if user.id == name => {
                    tracing::debug!("Read user {}", name);
                    users.insert(name, user);
                }
                Ok(user) => {
                    tracing::warn!("User file {} holds user {}, skipping", name, user.id);
                }
                Err(e) => {
                    tracing::warn!("Failed to read user {}: {}", name, e);
                }
            }
        }

        Ok(Self {
            dir,
            users: RwLock::new(users),
        })
    }

    pub fn get(&self, id: &str) -> Option<StoredUser> {
        self.users.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.users.read().contains_key(id)
    }

    pub fn admin_exists(&self) -> bool {
        self.contains(ADMIN_USER_ID)
    }

    /// Writes the user file and updates the index.
    pub fn put(&self, user: &StoredUser) -> Result<(), StorageError> {
        if !check_identifier(&user.id).is_ok() {
            return Err(StorageError::InvalidIdentifier(user.id.clone()));
        }
        crate::write_json(&self.dir.join(&user.id), user)?;
        self.users.write().insert(user.id.clone(), user.clone());
        Ok(())
    }

    /// Removes the user. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool, StorageError> {
        if !check_identifier(id).is_ok() {
            return Ok(false);
        }
        let existed = self.users.write().remove(id).is_some();
        crate::remove_if_exists(&self.dir.join(id))?;
        Ok(existed)
    }

    /// All users except the reserved identities, sorted by id.
    pub fn list_public(&self) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .read()
            .values()
            .filter(|u| !is_reserved_user_id(&u.id))
            .map(StoredUser::to_public)
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

//! Durable per-user notification queue.
//!
//! Layout: `<dir>/<user id>/<notification id>`, one JSON file per pending
//! notification. File names sort in creation order, which is the delivery
//! order.

use crate::error::StorageError;
use bidi_protocol::ident::check_identifier;
use bidi_protocol::Notification;
use std::path::{Path, PathBuf};

pub struct NotificationStore {
    dir: PathBuf,
}

impl NotificationStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn user_dir(&self, user_id: &str) -> Result<PathBuf, StorageError> {
        if !check_identifier(user_id).is_ok() {
            return Err(StorageError::InvalidIdentifier(user_id.to_string()));
        }
        Ok(self.dir.join(user_id))
    }

    /// Persists a notification for one recipient. Pings are never stored.
    pub fn store(&self, user_id: &str, notification: &Notification) -> Result<(), StorageError> {
        let id = match &notification.id {
            Some(id) if !notification.is_ping() => id,
            _ => {
                return Err(StorageError::Corruption(
                    "only identified, non-ping notifications can be stored".to_string(),
                ))
            }
        };
        if !check_identifier(id).is_ok() {
            return Err(StorageError::InvalidIdentifier(id.clone()));
        }

        let dir = self.user_dir(user_id)?;
        std::fs::create_dir_all(&dir)?;
        crate::write_json(&dir.join(id), notification)
    }

    /// All pending notifications of a user in delivery order.
    ///
    /// Files that cannot be parsed or carry no id are removed.
    pub fn load_all(&self, user_id: &str) -> Result<Vec<Notification>, StorageError> {
        let dir = self.user_dir(user_id)?;
        let mut notifications = Vec::new();

        for name in crate::sorted_file_names(&dir)? {
            let path = dir.join(&name);
            match crate::read_json::<Notification>(&path) {
                Ok(n) if n.id.is_some() && !n.is_ping() => notifications.push(n),
                Ok(_) => {
                    tracing::warn!("Removing notification file {} without id", path.display());
                    crate::remove_if_exists(&path)?;
                }
                Err(e) => {
                    tracing::warn!("Removing unreadable notification {}: {}", path.display(), e);
                    crate::remove_if_exists(&path)?;
                }
            }
        }

        Ok(notifications)
    }

    /// Deletes one notification. Unknown ids are a no-op.
    pub fn delete(&self, user_id: &str, notification_id: &str) -> Result<bool, StorageError> {
        if !check_identifier(notification_id).is_ok() {
            return Ok(false);
        }
        let dir = self.user_dir(user_id)?;
        crate::remove_if_exists(&dir.join(notification_id))
    }

    /// Drops the whole queue of a user.
    pub fn delete_all(&self, user_id: &str) -> Result<(), StorageError> {
        let dir = self.user_dir(user_id)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn pending_count(&self, user_id: &str) -> Result<usize, StorageError> {
        Ok(crate::sorted_file_names(&self.user_dir(user_id)?)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidi_protocol::{KeyPair, Payload};
    use std::sync::OnceLock;
    use tempfile::TempDir;

    fn keys() -> &'static KeyPair {
        static KEYS: OnceLock<KeyPair> = OnceLock::new();
        KEYS.get_or_init(|| KeyPair::generate().unwrap())
    }

    fn notification(text: &str) -> Notification {
        Notification::new(
            "alice",
            vec!["bob".to_string()],
            Payload::new(&text.to_string()).unwrap(),
            &keys().public,
        )
        .unwrap()
    }

    #[test]
    fn test_store_and_load_in_order() {
        let dir = TempDir::new().unwrap();
        let store = NotificationStore::open(dir.path()).unwrap();

        let first = notification("one");
        let second = notification("two");
        let third = notification("three");
        // Store out of order; load must follow the ids
        store.store("bob", &third).unwrap();
        store.store("bob", &first).unwrap();
        store.store("bob", &second).unwrap();

        let loaded = store.load_all("bob").unwrap();
        let ids: Vec<_> = loaded.iter().map(|n| n.id.clone().unwrap()).collect();
        let mut expected = vec![
            first.id.clone().unwrap(),
            second.id.clone().unwrap(),
            third.id.clone().unwrap(),
        ];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_ping_not_stored() {
        let dir = TempDir::new().unwrap();
        let store = NotificationStore::open(dir.path()).unwrap();
        assert!(store.store("bob", &Notification::ping()).is_err());
        assert_eq!(store.pending_count("bob").unwrap(), 0);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = NotificationStore::open(dir.path()).unwrap();
        let n = notification("x");
        let id = n.id.clone().unwrap();
        store.store("bob", &n).unwrap();

        assert!(store.delete("bob", &id).unwrap());
        assert!(!store.delete("bob", &id).unwrap());
        assert!(store.load_all("bob").unwrap().is_empty());
    }

    #[test]
    fn test_delete_rejects_path_ids() {
        let dir = TempDir::new().unwrap();
        let store = NotificationStore::open(dir.path()).unwrap();
        assert!(!store.delete("bob", "../carol").unwrap());
        assert!(store.load_all("../carol").is_err());
    }

    #[test]
    fn test_broken_files_are_removed() {
        let dir = TempDir::new().unwrap();
        let store = NotificationStore::open(dir.path()).unwrap();
        store.store("bob", &notification("ok")).unwrap();
        std::fs::write(dir.path().join("bob").join("0000"), "not json").unwrap();
        std::fs::write(
            dir.path().join("bob").join("0001"),
            serde_json::to_string(&Notification::ping()).unwrap(),
        )
        .unwrap();

        assert_eq!(store.load_all("bob").unwrap().len(), 1);
        assert_eq!(store.pending_count("bob").unwrap(), 1);
    }

    #[test]
    fn test_delete_all() {
        let dir = TempDir::new().unwrap();
        let store = NotificationStore::open(dir.path()).unwrap();
        store.store("bob", &notification("a")).unwrap();
        store.delete_all("bob").unwrap();
        store.delete_all("bob").unwrap();
        assert_eq!(store.pending_count("bob").unwrap(), 0);
    }
}

//! # bidi-storage
//!
//! File-backed stores for the bidi server.
//!
//! This crate provides:
//! - The `ServerData` folder layout
//! - User records with an in-memory index
//! - Data sets (gzip JSON) with their in-memory info index and data lock
//! - The durable per-user notification queue

pub mod datasets;
pub mod error;
pub mod layout;
pub mod notifications;
pub mod users;

pub use datasets::{DataSetStore, LockedDataSets};
pub use error::StorageError;
pub use layout::ServerDataLayout;
pub use notifications::NotificationStore;
pub use users::{StoredUser, UserStore};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::Path;

/// Writes `value` as pretty JSON and syncs the file.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let data = serde_json::to_vec_pretty(value)?;
    write_bytes(path, &data)
}

pub(crate) fn write_bytes(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Removes a file, treating "already gone" as success.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// File names directly inside `dir`, sorted.
pub(crate) fn sorted_file_names(dir: &Path) -> Result<Vec<String>, StorageError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

//! Data sets, stored as gzip-compressed JSON files.
//!
//! The in-memory info index doubles as the data lock: every check-then-act
//! sequence on data sets runs while holding a [`LockedDataSets`] guard.

use crate::error::StorageError;
use bidi_protocol::crypto::{gunzip, gzip};
use bidi_protocol::ident::check_identifier;
use bidi_protocol::types::{DataSet, DataSetInfo};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct DataSetStore {
    dir: PathBuf,
    infos: Mutex<HashMap<String, DataSetInfo>>,
}

impl DataSetStore {
    /// Opens the store. The info index starts empty; callers populate it
    /// from [`DataSetStore::load_all`] once infos have been derived.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            infos: Mutex::new(HashMap::new()),
        })
    }

    /// Reads every data set file. Unreadable files are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<DataSet>, StorageError> {
        let mut data_sets = Vec::new();
        for name in crate::sorted_file_names(&self.dir)? {
            if !check_identifier(&name).is_ok() {
                continue;
            }
            match read_data_set(&self.dir.join(&name)) {
                Ok(ds) => {
                    tracing::debug!("Read data set {}", name);
                    data_sets.push(ds);
                }
                Err(e) => tracing::warn!("Failed to read data set {}: {}", name, e),
            }
        }
        Ok(data_sets)
    }

    /// Acquires the data lock.
    pub fn lock(&self) -> LockedDataSets<'_> {
        LockedDataSets {
            dir: &self.dir,
            infos: self.infos.lock(),
        }
    }
}

/// Exclusive access to the data sets for the lifetime of the guard.
pub struct LockedDataSets<'a> {
    dir: &'a Path,
    infos: MutexGuard<'a, HashMap<String, DataSetInfo>>,
}

impl LockedDataSets<'_> {
    pub fn contains(&self, id: &str) -> bool {
        self.infos.contains_key(id)
    }

    pub fn info(&self, id: &str) -> Option<DataSetInfo> {
        self.infos.get(id).cloned()
    }

    /// Ids of all data sets, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.infos.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Infos of every data set the user is listed in, sorted by id.
    pub fn infos_of_user(&self, user_id: &str) -> Vec<DataSetInfo> {
        let mut infos: Vec<DataSetInfo> = self
            .infos
            .values()
            .filter(|info| info.user_ids.contains(user_id))
            .cloned()
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Reads a data set from disk. Invalid or unknown ids yield `None`.
    pub fn read(&self, id: &str) -> Result<Option<DataSet>, StorageError> {
        if !check_identifier(id).is_ok() || !self.infos.contains_key(id) {
            return Ok(None);
        }
        let path = self.dir.join(id);
        if !path.exists() {
            return Ok(None);
        }
        read_data_set(&path).map(Some)
    }

    /// Writes the data set and its info.
    pub fn write(&mut self, data_set: &DataSet, info: DataSetInfo) -> Result<(), StorageError> {
        if !check_identifier(&data_set.id).is_ok() {
            return Err(StorageError::InvalidIdentifier(data_set.id.clone()));
        }
        let json = serde_json::to_vec(data_set)?;
        crate::write_bytes(&self.dir.join(&data_set.id), &gzip(&json)?)?;
        self.infos.insert(data_set.id.clone(), info);
        Ok(())
    }

    /// Replaces only the in-memory info.
    pub fn set_info(&mut self, info: DataSetInfo) {
        self.infos.insert(info.id.clone(), info);
    }

    /// Deletes a data set. Returns whether it existed.
    pub fn remove(&mut self, id: &str) -> Result<bool, StorageError> {
        if !check_identifier(id).is_ok() {
            return Ok(false);
        }
        let existed = self.infos.remove(id).is_some();
        crate::remove_if_exists(&self.dir.join(id))?;
        Ok(existed)
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

fn read_data_set(path: &Path) -> Result<DataSet, StorageError> {
    let data = std::fs::read(path)?;
    let json = gunzip(&data)?;
    Ok(serde_json::from_slice(&json)?)
}

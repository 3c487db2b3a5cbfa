//! Per-tenant working directories
//!
//! Each tenant gets `<root>/<org_id>/` holding its silences file and
//! notification log. The same two records are mirrored into the key/value
//! store so clustered peers can rebuild a lost directory.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const SILENCES_FILENAME: &str = "silences";
pub const NOTIFICATION_LOG_FILENAME: &str = "notifications";

#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("file store i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn org_dir(&self, org_id: i64) -> PathBuf {
        self.root.join(org_id.to_string())
    }

    pub fn silences_path(&self, org_id: i64) -> PathBuf {
        self.org_dir(org_id).join(SILENCES_FILENAME)
    }

    pub fn notification_log_path(&self, org_id: i64) -> PathBuf {
        self.org_dir(org_id).join(NOTIFICATION_LOG_FILENAME)
    }

    /// Create the tenant's directory if it does not exist yet.
    pub fn ensure_org_dir(&self, org_id: i64) -> Result<PathBuf, FileStoreError> {
        let dir = self.org_dir(org_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn write(&self, org_id: i64, filename: &str, content: &[u8]) -> Result<(), FileStoreError> {
        let dir = self.ensure_org_dir(org_id)?;
        fs::write(dir.join(filename), content)?;
        Ok(())
    }

    pub fn read(&self, org_id: i64, filename: &str) -> Result<Option<Vec<u8>>, FileStoreError> {
        match fs::read(self.org_dir(org_id).join(filename)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove one tenant's entire directory. Missing directory is fine.
    pub fn delete_org(&self, org_id: i64) -> Result<(), FileStoreError> {
        match fs::remove_dir_all(self.org_dir(org_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete directories under the root whose name parses as an org id
    /// not in `live`. Returns the ids removed. Non-numeric entries are
    /// left alone.
    pub fn cleanup_orphans(&self, live: &HashSet<i64>) -> Result<Vec<i64>, FileStoreError> {
        let mut removed = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(err) => return Err(err.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(org_id) = name.to_str().and_then(|s| s.parse::<i64>().ok()) else {
                continue;
            };
            if !live.contains(&org_id) {
                fs::remove_dir_all(entry.path())?;
                removed.push(org_id);
            }
        }
        removed.sort_unstable();
        Ok(removed)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

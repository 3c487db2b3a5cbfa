//! Per-tenant alerting runtime
//!
//! An `OrgAlertmanager` owns one tenant's routing configuration and
//! working files. It starts unconfigured and becomes ready once a valid
//! configuration has been applied; a broken configuration leaves it
//! unconfigured rather than tearing it down.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::bus::BusError;

use super::filestore::{
    FileStore, FileStoreError, NOTIFICATION_LOG_FILENAME, SILENCES_FILENAME,
};
use super::kvstore::{KvStore, KV_NAMESPACE, NOTIFICATION_LOG_KEY, SILENCES_KEY};

#[derive(Debug, thiserror::Error)]
pub enum OrgError {
    #[error("invalid alertmanager configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    FileStore(#[from] FileStoreError),

    #[error(transparent)]
    Kv(#[from] BusError),
}

/// Routing tree node. Alerts enter at the root and land on the deepest
/// matching receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Hash)]
pub struct Route {
    pub receiver: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Hash)]
pub struct Receiver {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel_uids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Hash)]
pub struct AlertmanagerConfig {
    pub route: Route,
    pub receivers: Vec<Receiver>,
}

impl AlertmanagerConfig {
    /// Built-in configuration applied to tenants with nothing persisted.
    pub fn default_config() -> Self {
        Self {
            route: Route {
                receiver: "default-receiver".to_string(),
                group_by: Vec::new(),
                routes: Vec::new(),
            },
            receivers: vec![Receiver {
                name: "default-receiver".to_string(),
                channel_uids: Vec::new(),
            }],
        }
    }

    fn validate(&self) -> Result<(), OrgError> {
        if self.receivers.is_empty() {
            return Err(OrgError::InvalidConfig("no receivers defined".to_string()));
        }
        let known: Vec<&str> = self.receivers.iter().map(|r| r.name.as_str()).collect();
        let mut stack = vec![&self.route];
        while let Some(route) = stack.pop() {
            if !known.contains(&route.receiver.as_str()) {
                return Err(OrgError::InvalidConfig(format!(
                    "route references undefined receiver {:?}",
                    route.receiver
                )));
            }
            stack.extend(route.routes.iter());
        }
        Ok(())
    }

    fn hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        Hash::hash(self, &mut hasher);
        hasher.finish()
    }
}

struct Inner {
    config: Option<AlertmanagerConfig>,
    config_hash: u64,
}

pub struct OrgAlertmanager {
    org_id: i64,
    file_store: Arc<FileStore>,
    kv: Arc<dyn KvStore>,
    inner: RwLock<Inner>,
    ready: AtomicBool,
}

impl OrgAlertmanager {
    /// Create the tenant runtime and restore its working files from the
    /// key/value mirror when the local directory is empty.
    pub fn new(
        org_id: i64,
        file_store: Arc<FileStore>,
        kv: Arc<dyn KvStore>,
    ) -> Result<Self, OrgError> {
        file_store.ensure_org_dir(org_id)?;

        for (filename, kv_key) in [
            (SILENCES_FILENAME, SILENCES_KEY),
            (NOTIFICATION_LOG_FILENAME, NOTIFICATION_LOG_KEY),
        ] {
            if file_store.read(org_id, filename)?.is_none() {
                let restored = kv.get(org_id, KV_NAMESPACE, kv_key)?.unwrap_or_default();
                file_store.write(org_id, filename, restored.as_bytes())?;
            }
        }

        Ok(Self {
            org_id,
            file_store,
            kv,
            inner: RwLock::new(Inner {
                config: None,
                config_hash: 0,
            }),
            ready: AtomicBool::new(false),
        })
    }

    pub fn org_id(&self) -> i64 {
        self.org_id
    }

    /// Whether a valid configuration has ever been applied.
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn config(&self) -> Option<AlertmanagerConfig> {
        self.inner.read().config.clone()
    }

    /// Apply a configuration. Returns false when the configuration is
    /// byte-for-byte what is already running and nothing was done.
    pub fn apply_config(&self, config: &AlertmanagerConfig) -> Result<bool, OrgError> {
        config.validate()?;
        let hash = config.hash();

        let mut inner = self.inner.write();
        if self.ready() && inner.config_hash == hash {
            return Ok(false);
        }
        inner.config = Some(config.clone());
        inner.config_hash = hash;
        drop(inner);

        self.ready.store(true, Ordering::Release);
        tracing::info!(org_id = self.org_id, "applied alertmanager configuration");
        Ok(true)
    }

    /// Push the working files into the key/value mirror.
    pub fn flush(&self) -> Result<(), OrgError> {
        for (filename, kv_key) in [
            (SILENCES_FILENAME, SILENCES_KEY),
            (NOTIFICATION_LOG_FILENAME, NOTIFICATION_LOG_KEY),
        ] {
            if let Some(bytes) = self.file_store.read(self.org_id, filename)? {
                let value = String::from_utf8_lossy(&bytes);
                self.kv.set(self.org_id, KV_NAMESPACE, kv_key, &value)?;
            }
        }
        Ok(())
    }

    /// Stop the runtime, flushing state first. Flush errors are logged
    /// rather than surfaced since the runtime is going away either way.
    pub fn stop_and_wait(&self) {
        if let Err(err) = self.flush() {
            tracing::warn!(org_id = self.org_id, error = %err, "failed to flush tenant state on stop");
        }
        tracing::info!(org_id = self.org_id, "stopped tenant alertmanager");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::kvstore::InMemoryKvStore;

    fn fixture() -> (tempfile::TempDir, Arc<FileStore>, Arc<InMemoryKvStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path()));
        (dir, store, Arc::new(InMemoryKvStore::new()))
    }

    #[test]
    fn test_starts_unconfigured_then_ready() {
        let (_dir, files, kv) = fixture();
        let am = OrgAlertmanager::new(1, files, kv).unwrap();
        assert!(!am.ready());

        assert!(am.apply_config(&AlertmanagerConfig::default_config()).unwrap());
        assert!(am.ready());

        // Same configuration again is a no-op.
        assert!(!am.apply_config(&AlertmanagerConfig::default_config()).unwrap());
    }

    #[test]
    fn test_invalid_config_leaves_unconfigured() {
        let (_dir, files, kv) = fixture();
        let am = OrgAlertmanager::new(1, files, kv).unwrap();

        let mut config = AlertmanagerConfig::default_config();
        config.route.receiver = "missing".to_string();
        assert!(matches!(
            am.apply_config(&config),
            Err(OrgError::InvalidConfig(_))
        ));
        assert!(!am.ready());
    }

    #[test]
    fn test_restores_working_files_from_kv() {
        let (_dir, files, kv) = fixture();
        kv.set(1, KV_NAMESPACE, SILENCES_KEY, "replicated-silences")
            .unwrap();

        let _am = OrgAlertmanager::new(1, files.clone(), kv).unwrap();
        assert_eq!(
            files.read(1, SILENCES_FILENAME).unwrap(),
            Some(b"replicated-silences".to_vec())
        );
    }

    #[test]
    fn test_flush_mirrors_to_kv() {
        let (_dir, files, kv) = fixture();
        let am = OrgAlertmanager::new(1, files.clone(), kv.clone()).unwrap();
        files.write(1, SILENCES_FILENAME, b"local-edit").unwrap();

        am.stop_and_wait();
        assert_eq!(
            kv.get(1, KV_NAMESPACE, SILENCES_KEY).unwrap(),
            Some("local-edit".to_string())
        );
    }
}

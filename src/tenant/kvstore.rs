//! Namespaced key/value store
//!
//! Mirrors each tenant's silences and notification-log records so
//! clustered deployments can recover them without shared disk. Keys are
//! `(org_id, namespace, key)`.

use dashmap::DashMap;

use crate::bus::BusError;

pub const KV_NAMESPACE: &str = "alertmanager";
pub const SILENCES_KEY: &str = "silences";
pub const NOTIFICATION_LOG_KEY: &str = "notifications";

pub trait KvStore: Send + Sync {
    fn get(&self, org_id: i64, namespace: &str, key: &str) -> Result<Option<String>, BusError>;

    fn set(&self, org_id: i64, namespace: &str, key: &str, value: &str) -> Result<(), BusError>;

    fn delete(&self, org_id: i64, namespace: &str, key: &str) -> Result<(), BusError>;

    /// Every org id that has at least one entry under `namespace`.
    fn org_ids(&self, namespace: &str) -> Result<Vec<i64>, BusError>;

    /// Drop every entry a tenant holds under `namespace`.
    fn delete_org(&self, org_id: i64, namespace: &str) -> Result<(), BusError>;
}

#[derive(Default)]
pub struct InMemoryKvStore {
    entries: DashMap<(i64, String, String), String>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for InMemoryKvStore {
    fn get(&self, org_id: i64, namespace: &str, key: &str) -> Result<Option<String>, BusError> {
        Ok(self
            .entries
            .get(&(org_id, namespace.to_string(), key.to_string()))
            .map(|e| e.clone()))
    }

    fn set(&self, org_id: i64, namespace: &str, key: &str, value: &str) -> Result<(), BusError> {
        self.entries.insert(
            (org_id, namespace.to_string(), key.to_string()),
            value.to_string(),
        );
        Ok(())
    }

    fn delete(&self, org_id: i64, namespace: &str, key: &str) -> Result<(), BusError> {
        self.entries
            .remove(&(org_id, namespace.to_string(), key.to_string()));
        Ok(())
    }

    fn org_ids(&self, namespace: &str) -> Result<Vec<i64>, BusError> {
        let mut ids: Vec<i64> = self
            .entries
            .iter()
            .filter(|e| e.key().1 == namespace)
            .map(|e| e.key().0)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    fn delete_org(&self, org_id: i64, namespace: &str) -> Result<(), BusError> {
        self.entries
            .retain(|(id, ns, _), _| !(*id == org_id && ns == namespace));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_and_org_scan() {
        let store = InMemoryKvStore::new();
        store.set(1, KV_NAMESPACE, SILENCES_KEY, "a").unwrap();
        store.set(2, KV_NAMESPACE, SILENCES_KEY, "b").unwrap();
        store.set(2, "other", "x", "y").unwrap();

        assert_eq!(
            store.get(1, KV_NAMESPACE, SILENCES_KEY).unwrap(),
            Some("a".to_string())
        );
        assert_eq!(store.org_ids(KV_NAMESPACE).unwrap(), vec![1, 2]);

        store.delete_org(2, KV_NAMESPACE).unwrap();
        assert_eq!(store.org_ids(KV_NAMESPACE).unwrap(), vec![1]);
        assert_eq!(
            store.get(2, "other", "x").unwrap(),
            Some("y".to_string()),
            "other namespaces untouched"
        );
    }
}

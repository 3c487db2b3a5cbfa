//! Multi-tenant supervisor
//!
//! Owns one `OrgAlertmanager` per live organization and reconciles the
//! set on a timer: new tenants get a runtime and a configuration (stored
//! or default), departed tenants are stopped and their disk and
//! key/value artifacts deleted. The tenant map lock is held only for map
//! access, never across configuration apply or teardown.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::bus::BusError;
use crate::cluster::Peer;
use crate::metrics::Metrics;

use super::filestore::FileStore;
use super::kvstore::{KvStore, KV_NAMESPACE};
use super::org::{AlertmanagerConfig, OrgAlertmanager};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("no alertmanager for org {0}")]
    NoAlertmanagerForOrg(i64),

    #[error("alertmanager for org {0} is not ready")]
    AlertmanagerNotReady(i64),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Supplies the live tenant list.
pub trait OrgStore: Send + Sync {
    fn org_ids(&self) -> Result<Vec<i64>, BusError>;
}

/// Persisted per-tenant alertmanager configurations.
pub trait ConfigStore: Send + Sync {
    fn get_config(&self, org_id: i64) -> Result<Option<AlertmanagerConfig>, BusError>;

    fn save_config(&self, org_id: i64, config: &AlertmanagerConfig) -> Result<(), BusError>;
}

#[derive(Default)]
pub struct InMemoryOrgStore {
    orgs: RwLock<Vec<i64>>,
}

impl InMemoryOrgStore {
    pub fn new(orgs: Vec<i64>) -> Self {
        Self {
            orgs: RwLock::new(orgs),
        }
    }

    pub fn set_orgs(&self, orgs: Vec<i64>) {
        *self.orgs.write() = orgs;
    }
}

impl OrgStore for InMemoryOrgStore {
    fn org_ids(&self) -> Result<Vec<i64>, BusError> {
        Ok(self.orgs.read().clone())
    }
}

#[derive(Default)]
pub struct InMemoryConfigStore {
    configs: dashmap::DashMap<i64, AlertmanagerConfig>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn get_config(&self, org_id: i64) -> Result<Option<AlertmanagerConfig>, BusError> {
        Ok(self.configs.get(&org_id).map(|e| e.clone()))
    }

    fn save_config(&self, org_id: i64, config: &AlertmanagerConfig) -> Result<(), BusError> {
        self.configs.insert(org_id, config.clone());
        Ok(())
    }
}

/// Bound on the graceful cluster departure during shutdown.
const PEER_LEAVE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MultiOrgAlertmanager {
    alertmanagers: RwLock<HashMap<i64, Arc<OrgAlertmanager>>>,
    org_store: Arc<dyn OrgStore>,
    config_store: Arc<dyn ConfigStore>,
    file_store: Arc<FileStore>,
    kv: Arc<dyn KvStore>,
    peer: Arc<dyn Peer>,
    metrics: Arc<Metrics>,
    poll_interval: Duration,
}

impl MultiOrgAlertmanager {
    pub fn new(
        org_store: Arc<dyn OrgStore>,
        config_store: Arc<dyn ConfigStore>,
        file_store: Arc<FileStore>,
        kv: Arc<dyn KvStore>,
        peer: Arc<dyn Peer>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            alertmanagers: RwLock::new(HashMap::new()),
            org_store,
            config_store,
            file_store,
            kv,
            peer,
            metrics,
            poll_interval: Duration::from_secs(60),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn peer(&self) -> &Arc<dyn Peer> {
        &self.peer
    }

    /// Reconciliation loop. Runs one pass immediately, then on the poll
    /// interval until the shutdown channel fires; on shutdown every
    /// tenant runtime is stopped and the cluster departure announced,
    /// bounded by [`PEER_LEAVE_TIMEOUT`], before returning.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "starting multi-org alertmanager reconciliation"
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.load_and_sync_alertmanagers() {
                        tracing::error!(error = %err, "reconciliation pass failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("stopping multi-org alertmanager");
                    self.stop_all();
                    self.peer.leave(PEER_LEAVE_TIMEOUT).await;
                    return;
                }
            }
        }
    }

    /// One reconciliation pass.
    pub fn load_and_sync_alertmanagers(&self) -> Result<(), SupervisorError> {
        let org_ids = self.org_store.org_ids()?;
        self.metrics.set_discovered_org_configs(org_ids.len() as i64);

        self.sync_for_orgs(&org_ids);
        self.cleanup_orphan_local_org_state(&org_ids);

        let active = self
            .alertmanagers
            .read()
            .values()
            .filter(|am| am.ready())
            .count();
        self.metrics.set_active_org_configs(active as i64);
        Ok(())
    }

    fn sync_for_orgs(&self, org_ids: &[i64]) {
        for &org_id in org_ids {
            let existing = self.alertmanagers.read().get(&org_id).cloned();
            let am = match existing {
                Some(am) => am,
                None => {
                    match OrgAlertmanager::new(org_id, self.file_store.clone(), self.kv.clone()) {
                        Ok(am) => {
                            let am = Arc::new(am);
                            self.alertmanagers.write().insert(org_id, am.clone());
                            tracing::info!(org_id, "created alertmanager for org");
                            am
                        }
                        Err(err) => {
                            tracing::error!(org_id, error = %err, "failed to create alertmanager for org");
                            continue;
                        }
                    }
                }
            };

            if let Err(err) = self.apply_stored_config(org_id, &am) {
                // The org stays unconfigured until a valid config shows up.
                tracing::error!(org_id, error = %err, "failed to apply alertmanager configuration");
            }
        }

        // Tear down runtimes for orgs that disappeared. Arcs are collected
        // under the lock, stopped after it is released.
        let live: HashSet<i64> = org_ids.iter().copied().collect();
        let removed: Vec<(i64, Arc<OrgAlertmanager>)> = {
            let mut alertmanagers = self.alertmanagers.write();
            let gone: Vec<i64> = alertmanagers
                .keys()
                .filter(|id| !live.contains(id))
                .copied()
                .collect();
            gone.into_iter()
                .filter_map(|id| alertmanagers.remove(&id).map(|am| (id, am)))
                .collect()
        };

        for (org_id, am) in removed {
            am.stop_and_wait();
            self.delete_org_artifacts(org_id);
            tracing::info!(org_id, "removed alertmanager for departed org");
        }
    }

    fn apply_stored_config(
        &self,
        org_id: i64,
        am: &OrgAlertmanager,
    ) -> Result<(), SupervisorError> {
        match self.config_store.get_config(org_id)? {
            Some(config) => {
                am.apply_config(&config)
                    .map_err(|err| BusError::Storage(err.to_string()))?;
            }
            None => {
                // First sighting with nothing persisted: save and apply the
                // default so the org is never left unconfigured.
                let config = AlertmanagerConfig::default_config();
                self.config_store.save_config(org_id, &config)?;
                am.apply_config(&config)
                    .map_err(|err| BusError::Storage(err.to_string()))?;
                tracing::info!(org_id, "applied default alertmanager configuration");
            }
        }
        Ok(())
    }

    /// Delete disk and key/value artifacts belonging to tenants not in
    /// the live list. Covers both tracked removals and orphans left by a
    /// crash between teardown steps.
    fn cleanup_orphan_local_org_state(&self, org_ids: &[i64]) {
        let live: HashSet<i64> = org_ids.iter().copied().collect();

        match self.file_store.cleanup_orphans(&live) {
            Ok(removed) if !removed.is_empty() => {
                tracing::info!(orgs = ?removed, "removed orphaned alertmanager directories");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(error = %err, "failed to scan for orphaned alertmanager directories");
            }
        }

        match self.kv.org_ids(KV_NAMESPACE) {
            Ok(kv_orgs) => {
                for org_id in kv_orgs {
                    if !live.contains(&org_id) {
                        if let Err(err) = self.kv.delete_org(org_id, KV_NAMESPACE) {
                            tracing::error!(org_id, error = %err, "failed to delete orphaned key/value state");
                        } else {
                            tracing::info!(org_id, "removed orphaned key/value state");
                        }
                    }
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to scan key/value store for orphans");
            }
        }
    }

    fn delete_org_artifacts(&self, org_id: i64) {
        if let Err(err) = self.file_store.delete_org(org_id) {
            tracing::error!(org_id, error = %err, "failed to delete org directory");
        }
        if let Err(err) = self.kv.delete_org(org_id, KV_NAMESPACE) {
            tracing::error!(org_id, error = %err, "failed to delete org key/value state");
        }
    }

    /// Stop every tenant runtime. The map lock is released before any
    /// runtime teardown starts.
    pub fn stop_all(&self) {
        let alertmanagers: Vec<Arc<OrgAlertmanager>> = {
            let mut map = self.alertmanagers.write();
            map.drain().map(|(_, am)| am).collect()
        };
        for am in alertmanagers {
            am.stop_and_wait();
        }
    }

    /// Public read path for a tenant's runtime.
    pub fn alertmanager_for(&self, org_id: i64) -> Result<Arc<OrgAlertmanager>, SupervisorError> {
        let am = self
            .alertmanagers
            .read()
            .get(&org_id)
            .cloned()
            .ok_or(SupervisorError::NoAlertmanagerForOrg(org_id))?;
        if !am.ready() {
            return Err(SupervisorError::AlertmanagerNotReady(org_id));
        }
        Ok(am)
    }

    pub fn org_count(&self) -> usize {
        self.alertmanagers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NilPeer;
    use crate::tenant::filestore::SILENCES_FILENAME;
    use crate::tenant::kvstore::{InMemoryKvStore, SILENCES_KEY};

    struct Fixture {
        _dir: tempfile::TempDir,
        orgs: Arc<InMemoryOrgStore>,
        configs: Arc<InMemoryConfigStore>,
        files: Arc<FileStore>,
        kv: Arc<InMemoryKvStore>,
        supervisor: MultiOrgAlertmanager,
    }

    fn fixture(orgs: Vec<i64>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let org_store = Arc::new(InMemoryOrgStore::new(orgs));
        let config_store = Arc::new(InMemoryConfigStore::new());
        let files = Arc::new(FileStore::new(dir.path()));
        let kv = Arc::new(InMemoryKvStore::new());
        let supervisor = MultiOrgAlertmanager::new(
            org_store.clone(),
            config_store.clone(),
            files.clone(),
            kv.clone(),
            Arc::new(NilPeer),
            Arc::new(Metrics::new()),
        );
        Fixture {
            _dir: dir,
            orgs: org_store,
            configs: config_store,
            files,
            kv,
            supervisor,
        }
    }

    #[test]
    fn test_new_org_gets_default_config_and_becomes_ready() {
        let f = fixture(vec![1, 2]);
        f.supervisor.load_and_sync_alertmanagers().unwrap();

        assert_eq!(f.supervisor.org_count(), 2);
        assert!(f.supervisor.alertmanager_for(1).unwrap().ready());
        assert!(f.configs.get_config(1).unwrap().is_some());
    }

    #[test]
    fn test_alertmanager_for_distinguishes_missing_and_unready() {
        let f = fixture(vec![1]);
        assert!(matches!(
            f.supervisor.alertmanager_for(1),
            Err(SupervisorError::NoAlertmanagerForOrg(1))
        ));

        // Persist a broken config so the runtime is created but never
        // becomes ready.
        let mut broken = AlertmanagerConfig::default_config();
        broken.route.receiver = "nope".to_string();
        f.configs.save_config(1, &broken).unwrap();
        f.supervisor.load_and_sync_alertmanagers().unwrap();

        assert!(matches!(
            f.supervisor.alertmanager_for(1),
            Err(SupervisorError::AlertmanagerNotReady(1))
        ));
    }

    #[test]
    fn test_departed_org_is_stopped_and_wiped() {
        let f = fixture(vec![1, 2]);
        f.supervisor.load_and_sync_alertmanagers().unwrap();
        assert!(f.files.read(2, SILENCES_FILENAME).unwrap().is_some());

        f.orgs.set_orgs(vec![1]);
        f.supervisor.load_and_sync_alertmanagers().unwrap();

        assert_eq!(f.supervisor.org_count(), 1);
        assert!(f.files.read(2, SILENCES_FILENAME).unwrap().is_none());
        assert!(f.kv.get(2, KV_NAMESPACE, SILENCES_KEY).unwrap().is_none());
        // Org 1 untouched.
        assert!(f.files.read(1, SILENCES_FILENAME).unwrap().is_some());
    }

    #[test]
    fn test_orphan_cleanup_is_idempotent() {
        let f = fixture(vec![1]);
        // Artifacts for an org that was never in the live list, as left by
        // a crash before cleanup.
        f.files.write(9, SILENCES_FILENAME, b"stale").unwrap();
        f.kv.set(9, KV_NAMESPACE, SILENCES_KEY, "stale").unwrap();

        f.supervisor.load_and_sync_alertmanagers().unwrap();
        assert!(f.files.read(9, SILENCES_FILENAME).unwrap().is_none());
        assert!(f.kv.get(9, KV_NAMESPACE, SILENCES_KEY).unwrap().is_none());

        // Running again with the same live list deletes nothing further.
        f.supervisor.load_and_sync_alertmanagers().unwrap();
        assert!(f.files.read(1, SILENCES_FILENAME).unwrap().is_some());
        assert!(f.supervisor.alertmanager_for(1).is_ok());
    }

    #[tokio::test]
    async fn test_run_stops_cleanly_on_shutdown() {
        let f = fixture(vec![1]);
        let supervisor = Arc::new(f.supervisor);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let handle = tokio::spawn(supervisor.clone().run(shutdown_rx));
        // First tick fires immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(supervisor.org_count(), 1);

        shutdown_tx.send(()).await.unwrap();
        handle.await.unwrap();
        assert_eq!(supervisor.org_count(), 0);
    }

    /// Records whether a graceful departure was announced.
    struct RecordingPeer {
        left: std::sync::atomic::AtomicBool,
    }

    impl crate::cluster::Peer for RecordingPeer {
        fn name(&self) -> String {
            "recording".to_string()
        }

        fn position(&self) -> usize {
            0
        }

        fn member_count(&self) -> usize {
            1
        }

        fn wait_ready<'a>(&'a self, _timeout: Duration) -> futures::future::BoxFuture<'a, bool> {
            Box::pin(async { true })
        }

        fn broadcast(&self, _payload: Vec<u8>) {}

        fn leave<'a>(&'a self, _timeout: Duration) -> futures::future::BoxFuture<'a, ()> {
            self.left.store(true, std::sync::atomic::Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    #[tokio::test]
    async fn test_shutdown_leaves_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let peer = Arc::new(RecordingPeer {
            left: std::sync::atomic::AtomicBool::new(false),
        });
        let supervisor = Arc::new(MultiOrgAlertmanager::new(
            Arc::new(InMemoryOrgStore::new(vec![1])),
            Arc::new(InMemoryConfigStore::new()),
            Arc::new(FileStore::new(dir.path())),
            Arc::new(InMemoryKvStore::new()),
            peer.clone(),
            Arc::new(Metrics::new()),
        ));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let handle = tokio::spawn(supervisor.clone().run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown_tx.send(()).await.unwrap();
        handle.await.unwrap();
        assert_eq!(supervisor.org_count(), 0);
        assert!(peer.left.load(std::sync::atomic::Ordering::SeqCst));
    }
}

//! Per-organization alertmanager runtimes and the supervisor that
//! reconciles them against the live tenant list.

pub mod filestore;
pub mod kvstore;
pub mod org;
pub mod supervisor;

pub use filestore::{FileStore, FileStoreError};
pub use kvstore::{InMemoryKvStore, KvStore, KV_NAMESPACE};
pub use org::{AlertmanagerConfig, OrgAlertmanager, OrgError, Receiver, Route};
pub use supervisor::{
    ConfigStore, InMemoryConfigStore, InMemoryOrgStore, MultiOrgAlertmanager, OrgStore,
    SupervisorError,
};

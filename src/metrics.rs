//! Process metrics
//!
//! One `Metrics` struct is constructed at startup and passed by `Arc` to
//! every component that records an observation. There is no global
//! registry.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    evaluations: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    version_conflicts: AtomicU64,
    discovered_org_configs: AtomicI64,
    active_org_configs: AtomicI64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_evaluations(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_notifications_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_notifications_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_version_conflicts(&self) {
        self.version_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_discovered_org_configs(&self, n: i64) {
        self.discovered_org_configs.store(n, Ordering::Relaxed);
    }

    pub fn set_active_org_configs(&self, n: i64) {
        self.active_org_configs.store(n, Ordering::Relaxed);
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn notifications_sent(&self) -> u64 {
        self.notifications_sent.load(Ordering::Relaxed)
    }

    pub fn notifications_failed(&self) -> u64 {
        self.notifications_failed.load(Ordering::Relaxed)
    }

    pub fn version_conflicts(&self) -> u64 {
        self.version_conflicts.load(Ordering::Relaxed)
    }

    pub fn discovered_org_configs(&self) -> i64 {
        self.discovered_org_configs.load(Ordering::Relaxed)
    }

    pub fn active_org_configs(&self) -> i64 {
        self.active_org_configs.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.inc_evaluations();
        metrics.inc_evaluations();
        metrics.inc_version_conflicts();
        metrics.set_active_org_configs(3);

        assert_eq!(metrics.evaluations(), 2);
        assert_eq!(metrics.version_conflicts(), 1);
        assert_eq!(metrics.active_org_configs(), 3);
    }
}

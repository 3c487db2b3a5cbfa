//! Cluster peer abstraction
//!
//! Notification de-duplication needs to know how many processes share the
//! work and where this one sits in the ordering. Single-instance
//! deployments substitute `NilPeer` and incur no networking.

use std::time::Duration;

use futures::future::BoxFuture;

pub trait Peer: Send + Sync {
    /// Stable name of this node within the cluster.
    fn name(&self) -> String;

    /// This node's index in the sorted member list. Nodes use it to
    /// stagger duplicate work.
    fn position(&self) -> usize;

    fn member_count(&self) -> usize;

    /// Wait until membership has settled or the timeout elapses. Returns
    /// whether the cluster is considered ready.
    fn wait_ready<'a>(&'a self, timeout: Duration) -> BoxFuture<'a, bool>;

    /// Fire-and-forget payload to every known member, used to propagate
    /// silence and notification-log updates between processes.
    fn broadcast(&self, payload: Vec<u8>);

    /// Announce departure and stop gossiping, bounded by `timeout`.
    fn leave<'a>(&'a self, timeout: Duration) -> BoxFuture<'a, ()>;
}

/// Peer for deployments with no configured cluster.
pub struct NilPeer;

impl Peer for NilPeer {
    fn name(&self) -> String {
        "nil".to_string()
    }

    fn position(&self) -> usize {
        0
    }

    fn member_count(&self) -> usize {
        1
    }

    fn wait_ready<'a>(&'a self, _timeout: Duration) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }

    fn broadcast(&self, _payload: Vec<u8>) {}

    fn leave<'a>(&'a self, _timeout: Duration) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

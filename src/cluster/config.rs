use std::time::Duration;

use serde::{Deserialize, Serialize};

/// High-availability gossip configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// This node's name within the cluster
    pub node_name: String,
    /// Address the gossip socket binds to
    pub listen_addr: String,
    /// Address other peers should reach this node at
    pub advertise_addr: String,
    /// Seed peer addresses (excluding self)
    pub peers: Vec<String>,
    /// Interval between gossip rounds
    #[serde(with = "crate::model::duration_serde")]
    pub gossip_interval: Duration,
    /// Upper bound on waiting for membership to settle at startup
    #[serde(with = "crate::model::duration_serde")]
    pub settle_timeout: Duration,
}

impl GossipConfig {
    pub fn single_node() -> Self {
        Self {
            node_name: "klaxon-1".to_string(),
            listen_addr: "127.0.0.1:9094".to_string(),
            advertise_addr: "127.0.0.1:9094".to_string(),
            peers: Vec::new(),
            gossip_interval: Duration::from_millis(200),
            settle_timeout: Duration::from_secs(15),
        }
    }

    pub fn is_distributed(&self) -> bool {
        !self.peers.is_empty()
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self::single_node()
    }
}

pub mod config;
pub mod gossip;
pub mod peer;

pub use config::GossipConfig;
pub use gossip::{GossipError, GossipPeer};
pub use peer::{NilPeer, Peer};

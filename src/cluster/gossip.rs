//! UDP gossip membership
//!
//! Each node periodically sends its member view to a random sample of
//! known peers and merges the views it receives. Membership is used only
//! to size and order the cluster for notification de-duplication; alert
//! state itself is coordinated through the versioned dispatch records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use super::config::GossipConfig;
use super::peer::Peer;

/// Peers silent for this many gossip intervals are dropped.
const FAILURE_INTERVALS: u32 = 10;

/// How many peers each gossip round samples.
const GOSSIP_FANOUT: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("gossip socket error: {0}")]
    Socket(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemberInfo {
    name: String,
    addr: String,
}

#[derive(Debug, Serialize, Deserialize)]
enum Message {
    /// Periodic membership exchange.
    Sync {
        from: MemberInfo,
        members: Vec<MemberInfo>,
    },
    /// Graceful departure.
    Leave { from: String },
    /// Application payload relayed between members.
    Broadcast { from: String, payload: Vec<u8> },
}

struct Member {
    addr: String,
    last_seen: DateTime<Utc>,
}

struct Shared {
    config: GossipConfig,
    members: RwLock<HashMap<String, Member>>,
    broadcast_tx: tokio::sync::broadcast::Sender<(String, Vec<u8>)>,
}

impl Shared {
    fn observe(&self, info: &MemberInfo) {
        if info.name == self.config.node_name {
            return;
        }
        let mut members = self.members.write();
        let entry = members.entry(info.name.clone()).or_insert(Member {
            addr: info.addr.clone(),
            last_seen: Utc::now(),
        });
        entry.addr = info.addr.clone();
        entry.last_seen = Utc::now();
    }

    fn remove(&self, name: &str) {
        self.members.write().remove(name);
    }

    fn prune(&self) {
        let deadline = Utc::now()
            - chrono::Duration::from_std(self.config.gossip_interval * FAILURE_INTERVALS)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let mut members = self.members.write();
        members.retain(|name, member| {
            let alive = member.last_seen >= deadline;
            if !alive {
                tracing::warn!(peer = %name, "gossip peer timed out");
            }
            alive
        });
    }

    fn snapshot(&self) -> Vec<MemberInfo> {
        let members = self.members.read();
        let mut view: Vec<MemberInfo> = members
            .iter()
            .map(|(name, member)| MemberInfo {
                name: name.clone(),
                addr: member.addr.clone(),
            })
            .collect();
        view.push(MemberInfo {
            name: self.config.node_name.clone(),
            addr: self.config.advertise_addr.clone(),
        });
        view
    }

    fn self_info(&self) -> MemberInfo {
        MemberInfo {
            name: self.config.node_name.clone(),
            addr: self.config.advertise_addr.clone(),
        }
    }
}

/// Gossip-backed [`Peer`]. Construction binds the socket and spawns the
/// send/receive loops; `wait_ready` blocks until the initial membership
/// exchange settles.
pub struct GossipPeer {
    shared: Arc<Shared>,
    socket: Arc<UdpSocket>,
    shutdown_tx: watch::Sender<bool>,
}

impl GossipPeer {
    pub async fn start(config: GossipConfig) -> Result<Self, GossipError> {
        let socket = Arc::new(UdpSocket::bind(&config.listen_addr).await?);
        tracing::info!(
            listen_addr = %config.listen_addr,
            advertise_addr = %config.advertise_addr,
            seed_peers = config.peers.len(),
            "joining notification gossip cluster"
        );

        let (broadcast_tx, _) = tokio::sync::broadcast::channel(64);
        let shared = Arc::new(Shared {
            config,
            members: RwLock::new(HashMap::new()),
            broadcast_tx,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(recv_loop(shared.clone(), socket.clone(), shutdown_rx.clone()));
        tokio::spawn(send_loop(shared.clone(), socket.clone(), shutdown_rx));

        Ok(Self {
            shared,
            socket,
            shutdown_tx,
        })
    }

    /// Payloads other members broadcast, tagged with the sender's name.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<(String, Vec<u8>)> {
        self.shared.broadcast_tx.subscribe()
    }

    fn sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .snapshot()
            .into_iter()
            .map(|m| m.name)
            .collect();
        names.sort();
        names
    }
}

impl Peer for GossipPeer {
    fn name(&self) -> String {
        self.shared.config.node_name.clone()
    }

    fn position(&self) -> usize {
        self.sorted_names()
            .iter()
            .position(|n| *n == self.shared.config.node_name)
            .unwrap_or(0)
    }

    fn member_count(&self) -> usize {
        self.shared.members.read().len() + 1
    }

    fn wait_ready<'a>(&'a self, timeout: Duration) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let expected = self.shared.config.peers.len();
            let poll = self.shared.config.gossip_interval;
            let deadline = tokio::time::Instant::now() + timeout;

            loop {
                if self.member_count() >= expected + 1 {
                    tracing::info!(members = self.member_count(), "gossip cluster settled");
                    return true;
                }
                if tokio::time::Instant::now() >= deadline {
                    tracing::warn!(
                        members = self.member_count(),
                        expected = expected + 1,
                        "gossip cluster did not settle before timeout, continuing with partial membership"
                    );
                    return false;
                }
                tokio::time::sleep(poll).await;
            }
        })
    }

    fn broadcast(&self, payload: Vec<u8>) {
        let message = Message::Broadcast {
            from: self.shared.config.node_name.clone(),
            payload,
        };
        let Ok(encoded) = serde_json::to_vec(&message) else {
            return;
        };
        let targets: Vec<String> = self
            .shared
            .members
            .read()
            .values()
            .map(|m| m.addr.clone())
            .collect();
        let socket = self.socket.clone();
        tokio::spawn(async move {
            for addr in targets {
                if let Err(err) = socket.send_to(&encoded, &addr).await {
                    tracing::debug!(%addr, error = %err, "broadcast send failed");
                }
            }
        });
    }

    fn leave<'a>(&'a self, timeout: Duration) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let message = Message::Leave {
                from: self.shared.config.node_name.clone(),
            };
            let farewell = async {
                if let Ok(payload) = serde_json::to_vec(&message) {
                    let members = self.shared.snapshot();
                    for member in members {
                        if member.name != self.shared.config.node_name {
                            let _ = self.socket.send_to(&payload, &member.addr).await;
                        }
                    }
                }
                let _ = self.shutdown_tx.send(true);
            };
            if tokio::time::timeout(timeout, farewell).await.is_err() {
                tracing::warn!("timed out announcing departure from gossip cluster");
            }
        })
    }
}

async fn recv_loop(
    shared: Arc<Shared>,
    socket: Arc<UdpSocket>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let received = tokio::select! {
            received = socket.recv_from(&mut buf) => received,
            _ = shutdown_rx.changed() => {
                tracing::debug!("gossip receive loop stopped");
                return;
            }
        };
        let (len, from) = match received {
            Ok(received) => received,
            Err(err) => {
                tracing::error!(error = %err, "gossip receive failed");
                continue;
            }
        };

        let message: Message = match serde_json::from_slice(&buf[..len]) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(%from, error = %err, "ignoring malformed gossip datagram");
                continue;
            }
        };

        match message {
            Message::Sync { from, members } => {
                shared.observe(&from);
                for member in &members {
                    shared.observe(member);
                }
            }
            Message::Leave { from } => {
                tracing::info!(peer = %from, "gossip peer left the cluster");
                shared.remove(&from);
            }
            Message::Broadcast { from, payload } => {
                let _ = shared.broadcast_tx.send((from, payload));
            }
        }
    }
}

async fn send_loop(
    shared: Arc<Shared>,
    socket: Arc<UdpSocket>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(shared.config.gossip_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                shared.prune();
                let message = Message::Sync {
                    from: shared.self_info(),
                    members: shared.snapshot(),
                };
                let payload = match serde_json::to_vec(&message) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to encode gossip message");
                        continue;
                    }
                };

                for addr in gossip_targets(&shared) {
                    if let Err(err) = socket.send_to(&payload, &addr).await {
                        tracing::debug!(%addr, error = %err, "gossip send failed");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                tracing::debug!("gossip send loop stopped");
                return;
            }
        }
    }
}

/// Known member addresses plus seeds, randomly sampled down to the
/// fanout. Seeds stay in the pool so a partitioned node keeps retrying
/// them.
fn gossip_targets(shared: &Shared) -> Vec<String> {
    let mut addrs: Vec<String> = shared
        .members
        .read()
        .values()
        .map(|m| m.addr.clone())
        .collect();
    for seed in &shared.config.peers {
        if !addrs.contains(seed) {
            addrs.push(seed.clone());
        }
    }
    let mut rng = rand::thread_rng();
    addrs.shuffle(&mut rng);
    addrs.truncate(GOSSIP_FANOUT);
    addrs
}

//! Klaxon Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - KLAXON_HOST: Bind address (default: 0.0.0.0)
//! - KLAXON_PORT: Port number (default: 8080)
//! - KLAXON_DATA_PATH: Root of per-org working directories (default: data)
//! - KLAXON_RESEND_DELAY_SECS: Heartbeat/reminder base interval (default: 60)
//! - KLAXON_NOTIFICATION_TIMEOUT_SECS: Per-notification budget (default: 30)
//! - KLAXON_CONFIG_POLL_INTERVAL_SECS: Tenant reconciliation interval (default: 60)
//! - RUST_LOG: Log level (default: info)
//!
//! High-availability clustering (gossip de-duplication):
//! - KLAXON_HA_LISTEN_ADDR / KLAXON_HA_ADVERTISE_ADDR: Gossip addresses
//! - KLAXON_HA_PEERS: Comma-separated seed peer addresses
//! - KLAXON_HA_GOSSIP_INTERVAL_MS / KLAXON_HA_SETTLE_TIMEOUT_SECS

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use klaxon::api::{run_server, AppState};
use klaxon::bus::{DispatchBus, InMemoryBus};
use klaxon::cluster::{GossipConfig, GossipPeer, NilPeer, Peer};
use klaxon::config::Settings;
use klaxon::metrics::Metrics;
use klaxon::notify::{ChannelRegistry, Dispatcher};
use klaxon::tenant::{
    FileStore, InMemoryConfigStore, InMemoryKvStore, InMemoryOrgStore, MultiOrgAlertmanager,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "klaxon=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();

    tracing::info!("Klaxon configuration:");
    tracing::info!("  Host: {}:{}", settings.host, settings.port);
    tracing::info!("  Data path: {}", settings.data_path.display());
    tracing::info!("  Resend delay: {}s", settings.resend_delay.as_secs());
    tracing::info!(
        "  Notification timeout: {}s",
        settings.notification_timeout.as_secs()
    );
    tracing::info!(
        "  Config poll interval: {}s",
        settings.config_poll_interval.as_secs()
    );

    // Cluster peer: gossip when seeds are configured, no-op otherwise.
    let peer: Arc<dyn Peer> = if settings.is_clustered() {
        tracing::info!("  Cluster mode: HA gossip");
        tracing::info!("  Listen address: {}", settings.ha_listen_addr);
        tracing::info!("  Advertise address: {}", settings.ha_advertise_addr);
        tracing::info!("  Peers: {}", settings.ha_peers.len());

        let gossip_config = GossipConfig {
            node_name: format!("klaxon-{}", settings.ha_advertise_addr),
            listen_addr: settings.ha_listen_addr.clone(),
            advertise_addr: settings.ha_advertise_addr.clone(),
            peers: settings.ha_peers.clone(),
            gossip_interval: settings.ha_gossip_interval,
            settle_timeout: settings.ha_settle_timeout,
        };
        match GossipPeer::start(gossip_config).await {
            Ok(gossip) => {
                // Settling is best-effort: partial membership degrades to
                // per-process de-duplication.
                gossip.wait_ready(settings.ha_settle_timeout).await;
                Arc::new(gossip)
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to join gossip cluster, continuing standalone");
                Arc::new(NilPeer)
            }
        }
    } else {
        tracing::info!("  Cluster mode: DISABLED (single node)");
        Arc::new(NilPeer)
    };

    let metrics = Arc::new(Metrics::new());
    let bus: Arc<dyn DispatchBus> = Arc::new(InMemoryBus::new());

    let supervisor = Arc::new(
        MultiOrgAlertmanager::new(
            Arc::new(InMemoryOrgStore::new(vec![1])),
            Arc::new(InMemoryConfigStore::new()),
            Arc::new(FileStore::new(settings.data_path.join("alerting"))),
            Arc::new(InMemoryKvStore::new()),
            peer.clone(),
            metrics.clone(),
        )
        .with_poll_interval(settings.config_poll_interval),
    );

    let dispatcher = Arc::new(
        Dispatcher::new(bus.clone(), metrics.clone())
            .with_notification_timeout(settings.notification_timeout),
    );

    let state = Arc::new(AppState {
        supervisor: supervisor.clone(),
        dispatcher,
        registry: Arc::new(ChannelRegistry::with_defaults()),
        bus,
        metrics,
    });

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let supervisor_handle = tokio::spawn(supervisor.clone().run(shutdown_rx));

    println!(
        r#"
  _  __ _
 | |/ /| |  __ _ __  __ ___  _ __
 | ' / | | / _` |\ \/ // _ \| '_ \
 | . \ | || (_| | >  <| (_) | | | |
 |_|\_\|_| \__,_|/_/\_\\___/|_| |_|

 Multi-Tenant Alerting Runtime
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    run_server(addr, state, shutdown_signal()).await?;

    // The supervisor stops tenant runtimes and leaves the cluster.
    let _ = shutdown_tx.send(()).await;
    let _ = supervisor_handle.await;

    tracing::info!("Klaxon stopped");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, stopping...");
}

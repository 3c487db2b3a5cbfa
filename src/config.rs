//! Runtime settings
//!
//! All knobs come from `KLAXON_*` environment variables with sensible
//! defaults, so a bare `cargo run` starts a single-node instance.

use std::path::PathBuf;
use std::time::Duration;

/// Process-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bind address for the HTTP API.
    pub host: String,
    pub port: u16,
    /// Root of the per-org working directories.
    pub data_path: PathBuf,
    /// Base interval used for the firing heartbeat TTL and reminder
    /// cadence.
    pub resend_delay: Duration,
    /// Overall per-notification timeout budget. Image rendering gets half
    /// of this.
    pub notification_timeout: Duration,
    /// How often the supervisor reconciles org runtimes against the live
    /// tenant list.
    pub config_poll_interval: Duration,
    /// Gossip listen address; used only when peers are configured.
    pub ha_listen_addr: String,
    /// Address advertised to peers.
    pub ha_advertise_addr: String,
    /// Seed peer addresses; empty disables clustering entirely.
    pub ha_peers: Vec<String>,
    pub ha_gossip_interval: Duration,
    /// How long to wait for the gossip mesh to settle after joining.
    pub ha_settle_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_path: PathBuf::from("data"),
            resend_delay: Duration::from_secs(60),
            notification_timeout: Duration::from_secs(30),
            config_poll_interval: Duration::from_secs(60),
            ha_listen_addr: "0.0.0.0:9094".to_string(),
            ha_advertise_addr: "127.0.0.1:9094".to_string(),
            ha_peers: Vec::new(),
            ha_gossip_interval: Duration::from_millis(200),
            ha_settle_timeout: Duration::from_secs(30),
        }
    }
}

impl Settings {
    /// Parse settings from the environment.
    ///
    /// - KLAXON_HOST / KLAXON_PORT
    /// - KLAXON_DATA_PATH
    /// - KLAXON_RESEND_DELAY_SECS
    /// - KLAXON_NOTIFICATION_TIMEOUT_SECS
    /// - KLAXON_CONFIG_POLL_INTERVAL_SECS
    /// - KLAXON_HA_LISTEN_ADDR / KLAXON_HA_ADVERTISE_ADDR
    /// - KLAXON_HA_PEERS (comma separated)
    /// - KLAXON_HA_GOSSIP_INTERVAL_MS
    /// - KLAXON_HA_SETTLE_TIMEOUT_SECS
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: env_or("KLAXON_HOST", defaults.host),
            port: env_parsed("KLAXON_PORT", defaults.port),
            data_path: std::env::var("KLAXON_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_path),
            resend_delay: Duration::from_secs(env_parsed(
                "KLAXON_RESEND_DELAY_SECS",
                defaults.resend_delay.as_secs(),
            )),
            notification_timeout: Duration::from_secs(env_parsed(
                "KLAXON_NOTIFICATION_TIMEOUT_SECS",
                defaults.notification_timeout.as_secs(),
            )),
            config_poll_interval: Duration::from_secs(env_parsed(
                "KLAXON_CONFIG_POLL_INTERVAL_SECS",
                defaults.config_poll_interval.as_secs(),
            )),
            ha_listen_addr: env_or("KLAXON_HA_LISTEN_ADDR", defaults.ha_listen_addr),
            ha_advertise_addr: env_or("KLAXON_HA_ADVERTISE_ADDR", defaults.ha_advertise_addr),
            ha_peers: std::env::var("KLAXON_HA_PEERS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            ha_gossip_interval: Duration::from_millis(env_parsed(
                "KLAXON_HA_GOSSIP_INTERVAL_MS",
                defaults.ha_gossip_interval.as_millis() as u64,
            )),
            ha_settle_timeout: Duration::from_secs(env_parsed(
                "KLAXON_HA_SETTLE_TIMEOUT_SECS",
                defaults.ha_settle_timeout.as_secs(),
            )),
        }
    }

    /// Clustering is active only when seed peers are configured.
    pub fn is_clustered(&self) -> bool {
        !self.ha_peers.is_empty()
    }

    /// Image rendering budget: half the overall notification timeout, so a
    /// slow renderer cannot starve the rest of the dispatch.
    pub fn render_timeout(&self) -> Duration {
        self.notification_timeout / 2
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(!settings.is_clustered());
        assert_eq!(settings.render_timeout(), Duration::from_secs(15));
        assert_eq!(settings.resend_delay, Duration::from_secs(60));
    }
}

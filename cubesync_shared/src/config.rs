//! Configuration system.
//!
//! Loads server/client configuration from JSON strings (file IO left to app).
//! Every field has a default so partial JSON documents are accepted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing knobs of the connection layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Delay between connect request retries.
    pub connect_timeout_ms: u64,
    /// Connect requests sent before giving up.
    pub max_connect_attempts: u32,
    /// Send a heartbeat after this long without sending anything.
    pub heartbeat_timeout_ms: u64,
    /// Drop a peer after this long without hearing from it.
    pub disconnect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 1000,
            max_connect_attempts: 60,
            heartbeat_timeout_ms: 500,
            disconnect_timeout_ms: 30_000,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }
}

/// What a client mirror does with entries missing from a server update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MirrorPolicy {
    /// Keep them; only an explicit disconnect notice removes an entry.
    #[default]
    RetainAbsent,
    /// Remove them, so a lost disconnect notice cannot leave a stale entry.
    PruneAbsent,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP port to bind on all IPv4 interfaces. 0 picks an ephemeral port.
    pub port: u16,
    /// Event loop ticks per second.
    pub tick_hz: u32,
    /// Period of the full player list broadcast.
    pub broadcast_interval_ms: u64,
    /// Seed for player color sampling; random when unset.
    pub color_seed: Option<u64>,
    pub transport: TransportConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            tick_hz: 60,
            broadcast_interval_ms: 1000,
            color_seed: None,
            transport: TransportConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn tick_interval(&self) -> Duration {
        tick_interval(self.tick_hz)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms.max(1))
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_ip: String,
    pub server_port: u16,
    /// Event loop ticks per second.
    pub tick_hz: u32,
    /// Period of the local player state publish.
    pub publish_interval_ms: u64,
    pub mirror_policy: MirrorPolicy,
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_ip: "127.0.0.1".to_string(),
            server_port: 9000,
            tick_hz: 60,
            publish_interval_ms: 500,
            mirror_policy: MirrorPolicy::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// `ip:port` of the server.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_ip, self.server_port)
    }

    pub fn tick_interval(&self) -> Duration {
        tick_interval(self.tick_hz)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms.max(1))
    }
}

fn tick_interval(tick_hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(tick_hz.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_server_json_keeps_defaults() {
        let cfg = ServerConfig::from_json_str(r#"{"port": 7777}"#).unwrap();
        assert_eq!(cfg.port, 7777);
        assert_eq!(cfg.broadcast_interval(), Duration::from_secs(1));
        assert_eq!(cfg.transport, TransportConfig::default());
    }

    #[test]
    fn client_json_selects_mirror_policy() {
        let cfg = ClientConfig::from_json_str(
            r#"{"server_ip": "10.0.0.2", "mirror_policy": "prune_absent"}"#,
        )
        .unwrap();
        assert_eq!(cfg.mirror_policy, MirrorPolicy::PruneAbsent);
        assert_eq!(cfg.server_addr(), "10.0.0.2:9000");
        assert_eq!(cfg.publish_interval(), Duration::from_millis(500));
    }

    #[test]
    fn zero_tick_rate_does_not_divide_by_zero() {
        let cfg = ServerConfig {
            tick_hz: 0,
            ..Default::default()
        };
        assert_eq!(cfg.tick_interval(), Duration::from_secs(1));
    }
}

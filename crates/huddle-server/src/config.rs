//! Server configuration.

use std::time::Duration;

use huddle_hub::HubConfig;
use huddle_settings::{HubSettings, ServerSettings};
use serde::{Deserialize, Serialize};

/// Configuration for the huddle HTTP/WebSocket server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Largest inbound WebSocket message in bytes.
    pub max_message_size: usize,
    /// Idle read deadline, refreshed by every pong.
    pub pong_wait_secs: u64,
    /// Interval between server pings. Must be shorter than `pong_wait_secs`.
    pub ping_period_secs: u64,
    /// Deadline for each outbound write.
    pub write_wait_secs: u64,
    /// How long shutdown waits for background tasks.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 512 * 1024,
            pong_wait_secs: 60,
            ping_period_secs: 30,
            write_wait_secs: 10,
            shutdown_timeout_secs: 15,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_message_size: s.max_message_size,
            pong_wait_secs: s.pong_wait_secs,
            ping_period_secs: s.ping_period_secs,
            write_wait_secs: s.write_wait_secs,
            shutdown_timeout_secs: s.shutdown_timeout_secs,
        }
    }
}

impl ServerConfig {
    /// Timing handed to each connection's pumps.
    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            pong_wait: Duration::from_secs(self.pong_wait_secs),
            ping_period: Duration::from_secs(self.ping_period_secs),
            write_wait: Duration::from_secs(self.write_wait_secs),
        }
    }

    /// Shutdown wait as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Heartbeat and deadline timing of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PumpConfig {
    /// Idle read deadline.
    pub pong_wait: Duration,
    /// Ping interval.
    pub ping_period: Duration,
    /// Per-write deadline.
    pub write_wait: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        ServerConfig::default().pump_config()
    }
}

/// Hub sizing from the `hub` settings section.
pub fn hub_config(s: &HubSettings) -> HubConfig {
    HubConfig {
        client_buffer_size: s.client_buffer_size,
        room_queue_size: s.room_queue_size,
        inbound_queue_size: s.inbound_queue_size,
        max_workers: s.max_workers,
        membership_ttl: Duration::from_secs(s.membership_ttl_secs),
        membership_sweep: Duration::from_secs(s.membership_sweep_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_ephemeral_loopback() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_socket_timing() {
        let pumps = ServerConfig::default().pump_config();
        assert_eq!(pumps.pong_wait, Duration::from_secs(60));
        assert_eq!(pumps.ping_period, Duration::from_secs(30));
        assert_eq!(pumps.write_wait, Duration::from_secs(10));
        assert!(pumps.ping_period < pumps.pong_wait);
    }

    #[test]
    fn from_settings_copies_every_field() {
        let settings = ServerSettings {
            host: "0.0.0.0".into(),
            port: 9000,
            pong_wait_secs: 20,
            ping_period_secs: 5,
            ..ServerSettings::default()
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.pong_wait_secs, 20);
        assert_eq!(cfg.ping_period_secs, 5);
        assert_eq!(cfg.max_message_size, settings.max_message_size);
        assert_eq!(cfg.shutdown_timeout(), Duration::from_secs(settings.shutdown_timeout_secs));
    }

    #[test]
    fn hub_config_matches_hub_defaults() {
        assert_eq!(hub_config(&HubSettings::default()), HubConfig::default());
    }

    #[test]
    fn deserialize_from_json_string() {
        let json = r#"{"host":"10.0.0.1","port":3000,"max_message_size":1024,"pong_wait_secs":9,"ping_period_secs":3,"write_wait_secs":2,"shutdown_timeout_secs":1}"#;
        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.host, "10.0.0.1");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.pump_config().write_wait, Duration::from_secs(2));
    }
}

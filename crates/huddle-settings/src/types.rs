//! Settings type definitions.
//!
//! Every section implements [`Default`] with production values and is
//! marked `#[serde(default)]`, so a settings file only needs the keys it
//! changes. Field names are camelCase on disk.

use serde::{Deserialize, Serialize};

/// Secret used when neither the file nor the environment provides one.
pub const DEV_JWT_SECRET: &str = "your_secret_key_here";

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HuddleSettings {
    /// HTTP listener and socket timing.
    pub server: ServerSettings,
    /// Hub queue sizes and caching.
    pub hub: HubSettings,
    /// Token verification.
    pub auth: AuthSettings,
    /// Message store location.
    pub database: DatabaseSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// HTTP listener and per-socket timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Idle read deadline; refreshed by every pong.
    pub pong_wait_secs: u64,
    /// Interval between server pings. Must be shorter than `pong_wait_secs`.
    pub ping_period_secs: u64,
    /// Deadline for a single frame write.
    pub write_wait_secs: u64,
    /// Grace period for in-flight work on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_message_size: 512 * 1024,
            pong_wait_secs: 60,
            ping_period_secs: 30,
            write_wait_secs: 10,
            shutdown_timeout_secs: 15,
        }
    }
}

/// Hub sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Outbound frames buffered per connection before it counts as slow.
    pub client_buffer_size: usize,
    /// Envelopes buffered per room pipeline before inline delivery kicks in.
    pub room_queue_size: usize,
    /// Envelopes buffered in front of the worker pool.
    pub inbound_queue_size: usize,
    /// Worker tasks handling inbound envelopes.
    pub max_workers: usize,
    /// How long a membership answer is trusted.
    pub membership_ttl_secs: u64,
    /// How often expired membership entries are swept.
    pub membership_sweep_secs: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            client_buffer_size: 256,
            room_queue_size: 1000,
            inbound_queue_size: 1000,
            max_workers: 10,
            membership_ttl_secs: 300,
            membership_sweep_secs: 600,
        }
    }
}

/// Token verification.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 signing secret.
    pub jwt_secret: String,
    /// Lifetime of tokens minted by the CLI.
    pub token_ttl_hours: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_ttl_hours: 24,
        }
    }
}

/// Message store location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// `SQLite` file path; relative paths resolve under `~/.huddle`.
    pub path: String,
    /// Connection pool size.
    pub pool_size: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "huddle.db".to_string(),
            pool_size: 8,
        }
    }
}

/// Output format for log lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_socket_timing() {
        let s = ServerSettings::default();
        assert_eq!(s.port, 8080);
        assert_eq!(s.max_message_size, 512 * 1024);
        assert_eq!(s.pong_wait_secs, 60);
        assert_eq!(s.ping_period_secs, 30);
        assert_eq!(s.write_wait_secs, 10);
    }

    #[test]
    fn defaults_match_hub_sizing() {
        let h = HubSettings::default();
        assert_eq!(h.client_buffer_size, 256);
        assert_eq!(h.room_queue_size, 1000);
        assert_eq!(h.inbound_queue_size, 1000);
        assert_eq!(h.max_workers, 10);
        assert_eq!(h.membership_ttl_secs, 300);
        assert!(h.membership_sweep_secs > h.membership_ttl_secs);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: HuddleSettings =
            serde_json::from_str(r#"{"server":{"port":9000},"hub":{"maxWorkers":4}}"#).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.hub.max_workers, 4);
        assert_eq!(s.hub.room_queue_size, 1000);
        assert_eq!(s.auth.jwt_secret, DEV_JWT_SECRET);
    }

    #[test]
    fn keys_are_camel_case() {
        let json = serde_json::to_value(HuddleSettings::default()).unwrap();
        assert!(json["hub"].get("clientBufferSize").is_some());
        assert!(json["server"].get("pongWaitSecs").is_some());
        assert_eq!(json["logging"]["format"], "compact");
    }
}

//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HuddleSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `HUDDLE_*` environment overrides (highest priority)
//! 4. Validate cross-field constraints

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{HuddleSettings, LogFormat};

/// Resolve the huddle home directory (`~/.huddle`).
pub fn huddle_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".huddle")
}

/// Resolve the path to the settings file (`~/.huddle/settings.json`).
pub fn settings_path() -> PathBuf {
    huddle_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HuddleSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HuddleSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<HuddleSettings> {
    let defaults =
        serde_json::to_value(HuddleSettings::default()).map_err(SettingsError::Defaults)?;
    let parse_err = |source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(parse_err)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    serde_json::from_value(merged).map_err(parse_err)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut HuddleSettings) {
    apply_overrides_from(settings, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`.
///
/// Integers must parse and fall inside their range; anything else is
/// logged and ignored so the file/default value stays in effect.
pub fn apply_overrides_from(
    settings: &mut HuddleSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("HUDDLE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("HUDDLE_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("HUDDLE_MAX_MESSAGE_SIZE", 1024, 64 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }
    if let Some(v) = env.u64("HUDDLE_PONG_WAIT_SECS", 2, 3600) {
        settings.server.pong_wait_secs = v;
    }
    if let Some(v) = env.u64("HUDDLE_PING_PERIOD_SECS", 1, 3600) {
        settings.server.ping_period_secs = v;
    }
    if let Some(v) = env.u64("HUDDLE_WRITE_WAIT_SECS", 1, 600) {
        settings.server.write_wait_secs = v;
    }

    // ── Hub ─────────────────────────────────────────────────────────
    if let Some(v) = env.usize("HUDDLE_CLIENT_BUFFER_SIZE", 1, 1_000_000) {
        settings.hub.client_buffer_size = v;
    }
    if let Some(v) = env.usize("HUDDLE_ROOM_QUEUE_SIZE", 1, 1_000_000) {
        settings.hub.room_queue_size = v;
    }
    if let Some(v) = env.usize("HUDDLE_INBOUND_QUEUE_SIZE", 1, 1_000_000) {
        settings.hub.inbound_queue_size = v;
    }
    if let Some(v) = env.usize("HUDDLE_MAX_WORKERS", 1, 1024) {
        settings.hub.max_workers = v;
    }
    if let Some(v) = env.u64("HUDDLE_MEMBERSHIP_TTL_SECS", 1, 86_400) {
        settings.hub.membership_ttl_secs = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = env.string("JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }

    // ── Database / logging ──────────────────────────────────────────
    if let Some(v) = env.string("HUDDLE_DB_PATH") {
        settings.database.path = v;
    }
    if let Some(v) = env.string("HUDDLE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("HUDDLE_LOG_FORMAT") {
        match v.to_ascii_lowercase().as_str() {
            "json" => settings.logging.format = LogFormat::Json,
            "compact" => settings.logging.format = LogFormat::Compact,
            _ => warn!(key = "HUDDLE_LOG_FORMAT", value = %v, "unknown log format, ignoring"),
        }
    }
}

/// Reject values and combinations that cannot work at runtime.
///
/// The file path has no range checks of its own, so every interval and
/// size that ends up in a timer or a bounded channel must be non-zero here.
pub fn validate(settings: &HuddleSettings) -> Result<()> {
    let server = &settings.server;
    let hub = &settings.hub;
    for (key, value) in [
        ("pongWaitSecs", server.pong_wait_secs),
        ("pingPeriodSecs", server.ping_period_secs),
        ("writeWaitSecs", server.write_wait_secs),
        ("membershipTtlSecs", hub.membership_ttl_secs),
        ("membershipSweepSecs", hub.membership_sweep_secs),
        ("clientBufferSize", hub.client_buffer_size as u64),
        ("roomQueueSize", hub.room_queue_size as u64),
        ("inboundQueueSize", hub.inbound_queue_size as u64),
        ("maxWorkers", hub.max_workers as u64),
        ("poolSize", u64::from(settings.database.pool_size)),
    ] {
        if value == 0 {
            return Err(SettingsError::invalid(key, "must be > 0"));
        }
    }
    if server.ping_period_secs >= server.pong_wait_secs {
        return Err(SettingsError::invalid(
            "pingPeriodSecs",
            format!(
                "{}s must be shorter than pongWaitSecs ({}s)",
                server.ping_period_secs, server.pong_wait_secs
            ),
        ));
    }
    if hub.membership_sweep_secs < hub.membership_ttl_secs {
        return Err(SettingsError::invalid(
            "membershipSweepSecs",
            format!(
                "{}s must not be shorter than membershipTtlSecs ({}s)",
                hub.membership_sweep_secs, hub.membership_ttl_secs
            ),
        ));
    }
    if settings.auth.jwt_secret.is_empty() {
        return Err(SettingsError::invalid("jwtSecret", "must not be empty"));
    }
    Ok(())
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ClientSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `MAAS_*` environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::ClientSettings;

/// Resolve the path to the settings file (`~/.maas/ws-client.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".maas").join("ws-client.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ClientSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ClientSettings> {
    let defaults = serde_json::to_value(ClientSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ClientSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Reject values no client can run with.
pub fn validate(settings: &ClientSettings) -> Result<()> {
    let reconnect = &settings.reconnect;
    if !(0.0..=1.0).contains(&reconnect.jitter_factor) {
        return Err(SettingsError::InvalidValue(format!(
            "reconnect.jitterFactor must be within 0..=1, got {}",
            reconnect.jitter_factor
        )));
    }
    if reconnect.max_delay_ms < reconnect.base_delay_ms {
        return Err(SettingsError::InvalidValue(format!(
            "reconnect.maxDelayMs ({}) is below reconnect.baseDelayMs ({})",
            reconnect.max_delay_ms, reconnect.base_delay_ms
        )));
    }
    if settings.websocket.event_capacity == 0 {
        return Err(SettingsError::InvalidValue("websocket.eventCapacity must be positive".into()));
    }
    Ok(())
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

/// Apply `MAAS_*` environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut ClientSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value
/// is kept.
pub fn apply_overrides<F>(settings: &mut ClientSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Connection ──────────────────────────────────────────────────
    if let Some(v) = env.string("MAAS_WS_URL") {
        settings.websocket.url = Some(v);
    }
    if let Some(v) = env.string("MAAS_HOST") {
        settings.websocket.host = v;
    }
    if let Some(v) = env.u16("MAAS_PORT", 1, 65535) {
        settings.websocket.port = Some(v);
    }
    if let Some(v) = env.string("MAAS_BASE_PATH") {
        settings.websocket.base_path = v;
    }
    if let Some(v) = env.bool("MAAS_TLS") {
        settings.websocket.tls = v;
    }
    if let Some(v) = env.string("MAAS_CSRF_TOKEN") {
        settings.websocket.csrf_token = Some(v);
    }
    if let Some(v) = env.string("MAAS_SESSION_ID") {
        settings.websocket.session_id = Some(v);
    }
    if let Some(v) = env.u64("MAAS_EVENT_CAPACITY", 16, 1_000_000) {
        settings.websocket.event_capacity = usize::try_from(v).unwrap_or(usize::MAX);
    }

    // ── Reconnect ───────────────────────────────────────────────────
    if let Some(v) = env.u64("MAAS_RECONNECT_BASE_DELAY_MS", 10, 600_000) {
        settings.reconnect.base_delay_ms = v;
    }
    if let Some(v) = env.u64("MAAS_RECONNECT_MAX_DELAY_MS", 100, 3_600_000) {
        settings.reconnect.max_delay_ms = v;
    }
    if let Some(v) = env.u64("MAAS_RECONNECT_MAX_ATTEMPTS", 0, 10_000) {
        settings.reconnect.max_attempts = u32::try_from(v).unwrap_or(u32::MAX);
    }

    // ── Keepalive ───────────────────────────────────────────────────
    if let Some(raw) = env.string("MAAS_KEEPALIVE_INTERVAL_MS") {
        match parse_keepalive(&raw) {
            Some(v) => settings.keepalive.interval_ms = v,
            None => warn!(key = "MAAS_KEEPALIVE_INTERVAL_MS", value = %raw, "invalid keepalive interval, ignoring"),
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("MAAS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("MAAS_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
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

/// Keepalive interval: `0` disables, otherwise 1s to 1h.
fn parse_keepalive(val: &str) -> Option<u64> {
    match val.parse::<u64>().ok()? {
        0 => Some(0),
        _ => parse_u64_range(val, 1000, 3_600_000),
    }
}

// ── Env readers (thin wrappers) ─────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
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
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

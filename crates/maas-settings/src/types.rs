//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so partial
//! JSON files are accepted; missing fields take their default value.

use maas_core::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_JITTER_FACTOR, DEFAULT_MAX_DELAY_MS};
use serde::{Deserialize, Serialize};

/// Root settings for the websocket RPC client.
///
/// ```json
/// {
///   "websocket": { "host": "maas.example.com", "tls": true },
///   "reconnect": { "maxAttempts": 10 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Connection target and credentials.
    pub websocket: WebSocketSettings,
    /// Transport reconnect policy.
    pub reconnect: ReconnectSettings,
    /// Keepalive pings.
    pub keepalive: KeepaliveSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Where and how to connect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketSettings {
    /// Full websocket URL. Overrides `host`/`port`/`base_path`/`tls`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Region controller host.
    pub host: String,
    /// Port; omitted from the URL when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Websocket endpoint path.
    pub base_path: String,
    /// Use `wss://`.
    pub tls: bool,
    /// CSRF token sent as the `csrftoken` query parameter. Required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
    /// Session cookie sent on the upgrade request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Capacity of the broadcast channel observers read from.
    pub event_capacity: usize,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: Some(5240),
            base_path: "/MAAS/ws".to_string(),
            tls: false,
            csrf_token: None,
            session_id: None,
            event_capacity: 1024,
        }
    }
}

/// Transport reconnect policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Base delay for exponential backoff in ms.
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in ms.
    pub max_delay_ms: u64,
    /// Attempts before giving up; 0 retries forever.
    pub max_attempts: u32,
    /// Jitter factor 0.0–1.0.
    pub jitter_factor: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: 0,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

/// Keepalive pings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeepaliveSettings {
    /// Interval between `PING` frames in ms; 0 disables keepalive.
    pub interval_ms: u64,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self { interval_ms: 30_000 }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

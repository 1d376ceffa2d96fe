//! Settings schema.
//!
//! Every struct uses `#[serde(default)]`, so a partial JSON file only needs
//! the keys it changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Ping/pong timing.
    pub heartbeat: HeartbeatSettings,
    /// Transport limits.
    pub transport: TransportSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Where and under which path the engine endpoint listens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port; `0` picks a free one.
    pub port: u16,
    /// Route of the engine endpoint.
    pub base_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            base_path: "/engine.io/".to_string(),
        }
    }
}

/// Heartbeat timing, in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Time between server PINGs.
    pub ping_interval_ms: u64,
    /// Time the client has to answer a PING.
    pub ping_timeout_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            ping_interval_ms: 25_000,
            ping_timeout_ms: 20_000,
        }
    }
}

/// Transport limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Time allowed for the probe/upgrade exchange, in milliseconds.
    pub upgrade_timeout_ms: u64,
    /// Largest accepted polling body, in bytes.
    pub max_http_buffer_size: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            upgrade_timeout_ms: 10_000,
            max_http_buffer_size: 1_000_000,
        }
    }
}

/// Log output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`).
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
    /// Per-module level overrides, e.g. `{"eio_server": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            module_levels: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = EngineSettings::default();
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.server.base_path, "/engine.io/");
        assert_eq!(s.heartbeat.ping_interval_ms, 25_000);
        assert_eq!(s.heartbeat.ping_timeout_ms, 20_000);
        assert_eq!(s.transport.upgrade_timeout_ms, 10_000);
        assert_eq!(s.transport.max_http_buffer_size, 1_000_000);
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(EngineSettings::default()).unwrap();
        assert_eq!(json["server"]["basePath"], "/engine.io/");
        assert_eq!(json["heartbeat"]["pingIntervalMs"], 25_000);
        assert_eq!(json["transport"]["maxHttpBufferSize"], 1_000_000);
        assert!(json["logging"]["moduleLevels"].is_object());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let s: EngineSettings =
            serde_json::from_str(r#"{"heartbeat": {"pingTimeoutMs": 5}}"#).unwrap();
        assert_eq!(s.heartbeat.ping_timeout_ms, 5);
        assert_eq!(s.heartbeat.ping_interval_ms, 25_000);
        assert_eq!(s.server, ServerSettings::default());
    }
}

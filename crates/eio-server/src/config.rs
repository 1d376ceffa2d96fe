//! Server configuration.

use std::time::Duration;

use eio_settings::EngineSettings;
use serde::{Deserialize, Serialize};

use crate::session::SessionOptions;

/// Configuration for the engine server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Route the engine endpoint is mounted on.
    pub base_path: String,
    /// Milliseconds between server pings.
    pub ping_interval_ms: u64,
    /// Milliseconds to wait for a pong before closing the session.
    pub ping_timeout_ms: u64,
    /// Milliseconds allowed for the probe/upgrade exchange.
    pub upgrade_timeout_ms: u64,
    /// Largest accepted polling request body, in bytes.
    pub max_http_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            base_path: "/engine.io/".into(),
            ping_interval_ms: 25_000,
            ping_timeout_ms: 20_000,
            upgrade_timeout_ms: 10_000,
            max_http_buffer_size: 1_000_000, // 1 MB
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            base_path: settings.server.base_path.clone(),
            ping_interval_ms: settings.heartbeat.ping_interval_ms,
            ping_timeout_ms: settings.heartbeat.ping_timeout_ms,
            upgrade_timeout_ms: settings.transport.upgrade_timeout_ms,
            max_http_buffer_size: settings.transport.max_http_buffer_size,
        }
    }

    /// Ping interval as a `Duration`.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Ping timeout as a `Duration`.
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Upgrade timeout as a `Duration`.
    pub fn upgrade_timeout(&self) -> Duration {
        Duration::from_millis(self.upgrade_timeout_ms)
    }

    /// Per-session options derived from this config.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            ping_interval: self.ping_interval(),
            ping_timeout: self.ping_timeout(),
            upgrade_timeout: self.upgrade_timeout(),
            max_payload: u64::try_from(self.max_http_buffer_size).unwrap_or(u64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_host() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
    }

    #[test]
    fn default_port_is_zero() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_base_path() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.base_path, "/engine.io/");
    }

    #[test]
    fn default_heartbeat() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.ping_interval(), Duration::from_secs(25));
        assert_eq!(cfg.ping_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn session_options_follow_config() {
        let cfg = ServerConfig {
            ping_interval_ms: 100,
            ping_timeout_ms: 50,
            upgrade_timeout_ms: 10,
            max_http_buffer_size: 64,
            ..ServerConfig::default()
        };
        let opts = cfg.session_options();
        assert_eq!(opts.ping_interval, Duration::from_millis(100));
        assert_eq!(opts.ping_timeout, Duration::from_millis(50));
        assert_eq!(opts.upgrade_timeout, Duration::from_millis(10));
        assert_eq!(opts.max_payload, 64);
    }

    #[test]
    fn from_default_settings_matches_default() {
        let cfg = ServerConfig::from_settings(&EngineSettings::default());
        let def = ServerConfig::default();
        assert_eq!(cfg.host, def.host);
        assert_eq!(cfg.port, def.port);
        assert_eq!(cfg.base_path, def.base_path);
        assert_eq!(cfg.ping_interval_ms, def.ping_interval_ms);
        assert_eq!(cfg.ping_timeout_ms, def.ping_timeout_ms);
        assert_eq!(cfg.upgrade_timeout_ms, def.upgrade_timeout_ms);
        assert_eq!(cfg.max_http_buffer_size, def.max_http_buffer_size);
    }

    #[test]
    fn deserialize_from_json_string() {
        let json = r#"{"host":"10.0.0.1","port":3000,"base_path":"/eio/","ping_interval_ms":10,"ping_timeout_ms":5,"upgrade_timeout_ms":5,"max_http_buffer_size":512}"#;
        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.host, "10.0.0.1");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.base_path, "/eio/");
        assert_eq!(cfg.max_http_buffer_size, 512);
    }
}

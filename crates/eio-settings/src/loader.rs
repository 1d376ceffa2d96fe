//! Layered settings loading.
//!
//! 1. Compiled [`EngineSettings::default()`]
//! 2. Optional JSON file, deep-merged over the defaults and validated
//! 3. `EIO_*` environment variables (highest priority)
//!
//! A bad file is an error. A bad environment value is logged and ignored.

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::EngineSettings;

/// Load settings, merging `path` over the defaults when given and present,
/// then applying environment overrides.
pub fn load_settings(path: Option<&Path>) -> Result<EngineSettings> {
    let defaults = serde_json::to_value(EngineSettings::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut settings: EngineSettings = serde_json::from_value(merged)?;
    validate(&settings)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Load settings from a file (missing file means defaults) plus environment
/// overrides.
pub fn load_settings_from_path(path: &Path) -> Result<EngineSettings> {
    load_settings(Some(path))
}

/// Merge `source` into `target`. Objects merge per key, everything else is
/// replaced, and `null` in `source` keeps the target value.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut merged), Value::Object(overrides)) => {
            for (key, value) in overrides.into_iter().filter(|(_, v)| !v.is_null()) {
                let value = match merged.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (_, source) => source,
    }
}

/// Reject values that would make the server unusable.
pub fn validate(settings: &EngineSettings) -> Result<()> {
    if !settings.server.base_path.starts_with('/') {
        return invalid("server.basePath must start with '/'");
    }
    if settings.heartbeat.ping_interval_ms == 0 {
        return invalid("heartbeat.pingIntervalMs must be positive");
    }
    if settings.heartbeat.ping_timeout_ms == 0 {
        return invalid("heartbeat.pingTimeoutMs must be positive");
    }
    if settings.transport.upgrade_timeout_ms == 0 {
        return invalid("transport.upgradeTimeoutMs must be positive");
    }
    if settings.transport.max_http_buffer_size == 0 {
        return invalid("transport.maxHttpBufferSize must be positive");
    }
    if parse_log_format(&settings.logging.format).is_none() {
        return invalid("logging.format must be \"pretty\" or \"json\"");
    }
    Ok(())
}

/// Apply `EIO_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut EngineSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply `EIO_*` overrides using `lookup` to resolve variable names.
pub fn apply_overrides(settings: &mut EngineSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = Env { lookup };

    if let Some(v) = env.string("EIO_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("EIO_PORT", |v| v.parse::<u16>().ok()) {
        settings.server.port = v;
    }
    if let Some(v) = env.parsed("EIO_BASE_PATH", |v| v.starts_with('/').then(|| v.to_string())) {
        settings.server.base_path = v;
    }
    if let Some(v) = env.parsed("EIO_PING_INTERVAL", |v| parse_u64_range(v, 1, 3_600_000)) {
        settings.heartbeat.ping_interval_ms = v;
    }
    if let Some(v) = env.parsed("EIO_PING_TIMEOUT", |v| parse_u64_range(v, 1, 3_600_000)) {
        settings.heartbeat.ping_timeout_ms = v;
    }
    if let Some(v) = env.parsed("EIO_UPGRADE_TIMEOUT", |v| parse_u64_range(v, 1, 3_600_000)) {
        settings.transport.upgrade_timeout_ms = v;
    }
    if let Some(v) = env.parsed("EIO_MAX_HTTP_BUFFER_SIZE", |v| {
        parse_usize_range(v, 1, 1 << 30)
    }) {
        settings.transport.max_http_buffer_size = v;
    }
    if let Some(v) = env.string("EIO_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("EIO_LOG_FORMAT", parse_log_format) {
        settings.logging.format = v.to_string();
    }
}

fn invalid(msg: &str) -> Result<()> {
    Err(SettingsError::InvalidValue(msg.to_string()))
}

// ── Parsing ──

/// Parse a `u64` within `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `usize` within `min..=max`.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Normalize a log format name.
pub fn parse_log_format(val: &str) -> Option<&'static str> {
    match val.trim().to_ascii_lowercase().as_str() {
        "pretty" => Some("pretty"),
        "json" => Some("json"),
        _ => None,
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let raw = self.string(name)?;
        let parsed = parse(&raw);
        if parsed.is_none() {
            warn!(key = name, value = %raw, "invalid env var, ignoring");
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use serde_json::json;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    // ── deep_merge ──

    #[test]
    fn merge_nested_override() {
        let merged = deep_merge(
            json!({"server": {"port": 80, "host": "a"}}),
            json!({"server": {"port": 90}}),
        );
        assert_eq!(merged, json!({"server": {"port": 90, "host": "a"}}));
    }

    #[test]
    fn merge_null_keeps_target() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null, "b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn merge_replaces_arrays_and_primitives() {
        assert_eq!(deep_merge(json!({"a": [1, 2]}), json!({"a": [3]})), json!({"a": [3]}));
        assert_eq!(deep_merge(json!({"a": {"b": 1}}), json!({"a": 5})), json!({"a": 5}));
        assert_eq!(deep_merge(json!("x"), json!("y")), json!("y"));
    }

    // ── load_settings ──

    /// Defaults plus whatever `EIO_*` variables this process exports.
    fn expected(base: EngineSettings) -> EngineSettings {
        let mut expected = base;
        apply_env_overrides(&mut expected);
        expected
    }

    #[test]
    fn no_path_gives_defaults() {
        let settings = load_settings(None).unwrap();
        assert_eq!(settings, expected(EngineSettings::default()));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, expected(EngineSettings::default()));
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"basePath": "/rt/"}, "transport": {"upgradeTimeoutMs": 500}}"#,
        )
        .unwrap();

        let mut base = EngineSettings::default();
        base.server.base_path = "/rt/".into();
        base.transport.upgrade_timeout_ms = 500;
        assert_eq!(load_settings_from_path(&path).unwrap(), expected(base));
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn invalid_file_value_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"heartbeat": {"pingIntervalMs": 0}}"#).unwrap();
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(msg)) if msg.contains("pingIntervalMs")
        );
    }

    // ── validate ──

    #[test]
    fn validate_rejects_relative_base_path() {
        let mut s = EngineSettings::default();
        s.server.base_path = "engine.io/".into();
        assert_matches!(validate(&s), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_unknown_log_format() {
        let mut s = EngineSettings::default();
        s.logging.format = "xml".into();
        assert_matches!(validate(&s), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(validate(&EngineSettings::default()).is_ok());
    }

    // ── overrides ──

    #[test]
    fn overrides_apply() {
        let mut s = EngineSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("EIO_HOST", "0.0.0.0"),
                ("EIO_PORT", "3000"),
                ("EIO_BASE_PATH", "/socket/"),
                ("EIO_PING_INTERVAL", "1000"),
                ("EIO_PING_TIMEOUT", "500"),
                ("EIO_UPGRADE_TIMEOUT", "250"),
                ("EIO_MAX_HTTP_BUFFER_SIZE", "2048"),
                ("EIO_LOG_LEVEL", "debug"),
                ("EIO_LOG_FORMAT", "JSON"),
            ]),
        );
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.server.port, 3000);
        assert_eq!(s.server.base_path, "/socket/");
        assert_eq!(s.heartbeat.ping_interval_ms, 1000);
        assert_eq!(s.heartbeat.ping_timeout_ms, 500);
        assert_eq!(s.transport.upgrade_timeout_ms, 250);
        assert_eq!(s.transport.max_http_buffer_size, 2048);
        assert_eq!(s.logging.level, "debug");
        assert_eq!(s.logging.format, "json");
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut s = EngineSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("EIO_PORT", "99999"),
                ("EIO_BASE_PATH", "no-slash"),
                ("EIO_PING_INTERVAL", "0"),
                ("EIO_PING_TIMEOUT", "soon"),
                ("EIO_LOG_FORMAT", "xml"),
                ("EIO_HOST", ""),
            ]),
        );
        assert_eq!(s, EngineSettings::default());
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("10", 1, 10), Some(10));
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range(" 5 ", 1, 10), Some(5));
        assert_eq!(parse_usize_range("-1", 0, 10), None);
    }
}

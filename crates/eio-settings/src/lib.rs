//! # eio-settings
//!
//! Layered configuration for the engine server.
//!
//! Settings resolve in three layers, later ones winning:
//! 1. **Compiled defaults**: [`EngineSettings::default()`]
//! 2. **JSON file**: deep-merged over the defaults, then validated
//! 3. **Environment**: `EIO_*` overrides
//!
//! The file uses camelCase keys and may be partial:
//!
//! ```json
//! { "heartbeat": { "pingIntervalMs": 10000 }, "logging": { "format": "json" } }
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path};
pub use types::{EngineSettings, HeartbeatSettings, LoggingSettings, ServerSettings, TransportSettings};

//! # eio-logging
//!
//! Installs the global `tracing` subscriber: an [`EnvFilter`] plus one fmt
//! layer writing to stderr, either compact human-readable lines or JSON.
//!
//! `RUST_LOG` takes precedence over the configured level and module
//! overrides.

#![deny(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use eio_settings::LoggingSettings;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Unknown output format name.
    #[error("unknown log format: {0}")]
    InvalidFormat(String),
    /// The level or a module override is not a valid filter directive.
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),
    /// A global subscriber is already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Result type for logging setup.
pub type Result<T> = std::result::Result<T, LoggingError>;

/// Output encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event, with span fields.
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        })
    }
}

/// What to log and how.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default level.
    pub level: String,
    /// Output encoding.
    pub format: LogFormat,
    /// Per-module level overrides.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            module_levels: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &LoggingSettings) -> Result<Self> {
        Ok(Self {
            level: settings.level.clone(),
            format: settings.format.parse()?,
            module_levels: settings.module_levels.clone(),
        })
    }

    /// Filter directive for this config, e.g. `info,eio_server=debug`.
    pub fn filter_directive(&self) -> String {
        let mut directive = self.level.clone();
        for (module, level) in &self.module_levels {
            directive.push(',');
            directive.push_str(module);
            directive.push('=');
            directive.push_str(level);
        }
        directive
    }

    /// Filter built from this config alone, ignoring `RUST_LOG`.
    pub fn config_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(self.filter_directive())
            .map_err(|e| LoggingError::InvalidFilter(e.to_string()))
    }

    fn filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => self.config_filter(),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = config.filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    installed.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

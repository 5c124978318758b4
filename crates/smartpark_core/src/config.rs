//! Store and service configuration with documented defaults.
//!
//! # Responsibility
//! - Enumerate every recognized option and its default in one place.
//! - Load overrides from the process environment.
//!
//! # Invariants
//! - A validated config always has a non-empty identifier keyspace, a
//!   non-zero port, page size and request timeout.

use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Default store host (local node).
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default store native-protocol port.
pub const DEFAULT_PORT: u16 = 9042;
/// Default keyspace (namespace) holding all entity tables.
pub const DEFAULT_KEYSPACE: &str = "smartpark";
/// Default bound for one store round-trip.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
/// Default list page size.
pub const DEFAULT_PAGE_SIZE: u32 = 50;
/// Default list page index.
pub const DEFAULT_PAGE_INDEX: u32 = 0;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration load/validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable holds a value that cannot be parsed.
    InvalidEnv { var: &'static str, value: String },
    /// A field holds an unusable value.
    InvalidValue { field: &'static str, reason: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEnv { var, value } => {
                write!(f, "environment variable {var} has invalid value `{value}`")
            }
            Self::InvalidValue { field, reason } => write!(f, "invalid {field}: {reason}"),
        }
    }
}

impl Error for ConfigError {}

/// Connection settings for the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub keyspace: String,
    /// Upper bound for every store round-trip, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            keyspace: DEFAULT_KEYSPACE.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl StoreConfig {
    /// Returns a default config bound to `keyspace`.
    pub fn for_keyspace(keyspace: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !is_identifier(&self.keyspace) {
            return Err(ConfigError::InvalidValue {
                field: "keyspace",
                reason: format!(
                    "`{}` must start with a letter and contain only [A-Za-z0-9_]",
                    self.keyspace
                ),
            });
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "host",
                reason: "must not be empty".to_string(),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "port",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "requestTimeoutMs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Entity service settings: store connection plus list paging defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceConfig {
    pub db: StoreConfig,
    pub page_size: u32,
    pub page_index: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db: StoreConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
            page_index: DEFAULT_PAGE_INDEX,
        }
    }
}

impl ServiceConfig {
    /// Builds a config from defaults overlaid with environment variables.
    ///
    /// Recognized: `DB_HOST`, `DB_PORT`, `DB_KEYSPACE`, `DB_TIMEOUT_MS`,
    /// `PAGE_SIZE`.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let mut config = Self::default();
        if let Some(host) = lookup("DB_HOST") {
            config.db.host = host;
        }
        if let Some(value) = lookup("DB_PORT") {
            config.db.port = parse_env("DB_PORT", value)?;
        }
        if let Some(keyspace) = lookup("DB_KEYSPACE") {
            config.db.keyspace = keyspace;
        }
        if let Some(value) = lookup("DB_TIMEOUT_MS") {
            config.db.request_timeout_ms = parse_env("DB_TIMEOUT_MS", value)?;
        }
        if let Some(value) = lookup("PAGE_SIZE") {
            config.page_size = parse_env("PAGE_SIZE", value)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.db.validate()?;
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pageSize",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> ConfigResult<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}

/// Returns whether `value` is a plain store identifier.
pub(crate) fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

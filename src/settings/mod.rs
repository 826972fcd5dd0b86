//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by
//! environment variables (prefix `FEDLINK`, separator `__`). An example
//! configuration lives in `configs/leader.toml`.

use std::{path::Path, path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::common::Role;

#[derive(Debug, Error)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Default, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically
/// named settings field.
pub struct Settings {
    #[serde(default)]
    pub log: LoggingSettings,
    #[validate]
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[validate]
    #[serde(default)]
    pub aggregation: AggregationSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation
    /// failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(config::File::from(path.as_ref()))?;
        config.merge(Environment::with_prefix("fedlink").separator("__"))?;
        config.try_into()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    /// A tracing filter directive, e.g. `info` or `fedlink=debug`.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Installs the global tracing subscriber from the logging settings.
pub fn init_logging(settings: &LoggingSettings) {
    let filter = EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[derive(Debug, Deserialize, Clone, Validate)]
/// Settings of the connection manager.
pub struct ConnectionSettings {
    /// How often a pending address is attempted before it is discarded.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1))]
    pub max_attempts: u32,

    /// Fixed backoff between attempts on the same address, in seconds.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,

    /// Bound on a single rendezvous, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Pause between sweep passes of the retry loop, in milliseconds.
    #[serde(default = "default_sweep_interval_millis")]
    pub sweep_interval_millis: u64,

    /// Whether addresses may keep arriving at runtime. When disabled,
    /// every configured address must connect before the manager settles,
    /// and exhausting the attempt bound raises the abnormal-exit flag.
    #[serde(default = "default_dynamic")]
    pub dynamic: bool,

    /// Address record file re-read on every sweep when set.
    #[serde(default)]
    pub address_file: Option<PathBuf>,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_sweep_interval_millis() -> u64 {
    500
}

fn default_dynamic() -> bool {
    true
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            sweep_interval_millis: default_sweep_interval_millis(),
            dynamic: default_dynamic(),
            address_file: None,
        }
    }
}

impl ConnectionSettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_millis)
    }
}

#[derive(Debug, Deserialize, Clone)]
/// Settings of one session pair.
pub struct SessionSettings {
    /// Hard bound on a follower's handshake wait, in seconds.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// Interval between status polls during a handshake wait, in
    /// milliseconds.
    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,

    /// Leader only: return a pending handle from upload/download instead
    /// of awaiting the bulk transfer inline.
    #[serde(default)]
    pub async_transfer: bool,

    /// Human-readable name written into the own status record.
    #[serde(default = "default_nick_name")]
    pub nick_name: String,
}

fn default_handshake_timeout_secs() -> u64 {
    1800
}

fn default_poll_interval_millis() -> u64 {
    100
}

fn default_nick_name() -> String {
    "anonymous".to_string()
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout_secs(),
            poll_interval_millis: default_poll_interval_millis(),
            async_transfer: false,
            nick_name: default_nick_name(),
        }
    }
}

impl SessionSettings {
    /// Role-dependent defaults: the leader drives many sessions from one
    /// loop and defaults to pending transfers, the follower awaits inline.
    pub fn defaults_for(role: Role) -> Self {
        Self {
            async_transfer: role.is_leader(),
            ..Self::default()
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
/// The two accumulation disciplines of the aggregator.
pub enum AggregationMode {
    /// Streaming running-average ingestion.
    Merge,
    /// Buffer contributions, reduce them in one batch at aggregate time.
    Stack,
}

impl Default for AggregationMode {
    fn default() -> Self {
        AggregationMode::Merge
    }
}

#[derive(Debug, Default, Deserialize, Clone, Validate)]
/// Settings of the aggregation engine.
pub struct AggregationSettings {
    #[serde(default)]
    pub mode: AggregationMode,

    /// Task-info key used to weight contributions and reduced reports.
    #[serde(default)]
    pub weight_key: Option<String>,

    /// Elastic aggregation quantile; must lie in the open interval (0, 1).
    #[serde(default)]
    #[validate(custom = "validate_quantile")]
    pub quantile: Option<f64>,
}

fn validate_quantile(quantile: f64) -> Result<(), ValidationError> {
    if 0.0 < quantile && quantile < 1.0 {
        Ok(())
    } else {
        Err(ValidationError::new("quantile must lie in (0, 1)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ConnectionSettings::default();
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.backoff(), Duration::from_secs(10));

        let session = SessionSettings::default();
        assert_eq!(session.handshake_timeout(), Duration::from_secs(1800));
        assert!(!session.async_transfer);
    }

    #[test]
    fn test_role_dependent_async_transfer() {
        assert!(SessionSettings::defaults_for(Role::Leader).async_transfer);
        assert!(!SessionSettings::defaults_for(Role::Follower).async_transfer);
    }

    #[test]
    fn test_quantile_open_interval() {
        let mut settings = AggregationSettings::default();
        assert!(settings.validate().is_ok());

        settings.quantile = Some(0.5);
        assert!(settings.validate().is_ok());

        for bad in [0.0, 1.0, -0.1, 1.5] {
            settings.quantile = Some(bad);
            assert!(settings.validate().is_err(), "{} should be rejected", bad);
        }
    }
}

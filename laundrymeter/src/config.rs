//! Daemon configuration.
//!
//! Read from a TOML file; every section and field is optional and falls
//! back to its default. A few settings, mostly secrets, can also be set
//! through `LAUNDRYMETER_*` environment variables, which win over the
//! file.
//!
//! ```toml
//! [sensor]
//! host = "192.168.1.50"
//!
//! [estimator]
//! threshold_w = 80.0
//! debounce_ticks = 56
//!
//! [telegram]
//! bot_token = "123456:ABC..."
//!
//! [[directory.users]]
//! username = "ada"
//! password = "engine"
//! name = "Ada Lovelace"
//! email = "ada@example.org"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::api::ApiConfig;
use crate::auth::DirectoryConfig;
use crate::machine::EstimatorConfig;
use crate::notify::email::SmtpConfig;
use crate::notify::telegram::TelegramConfig;
use crate::poller::PollerConfig;
use crate::sensor::SmartPlugConfig;
use crate::store::{DatabaseConfig, RetentionConfig};

/// Sensor timeouts below this make every read fail on a busy network.
const MIN_SENSOR_TIMEOUT_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} in {var}")]
    Env { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub poller: PollerConfig,
    pub estimator: EstimatorConfig,
    pub retention: RetentionConfig,
    pub sensor: SmartPlugConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub directory: DirectoryConfig,
    pub smtp: Option<SmtpConfig>,
    pub telegram: Option<TelegramConfig>,
}

impl Config {
    /// Load from `path`, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::parse(&text)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `LAUNDRYMETER_*` overrides. `lookup` is `std::env::var` in
    /// production.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("LAUNDRYMETER_SENSOR_HOST") {
            self.sensor.host = host;
        }
        if let Some(listen) = lookup("LAUNDRYMETER_API_LISTEN") {
            self.api.listen = listen.parse().map_err(|_| ConfigError::Env {
                var: "LAUNDRYMETER_API_LISTEN",
                value: listen.clone(),
            })?;
        }
        if let Some(path) = lookup("LAUNDRYMETER_DATABASE") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(interval) = lookup("LAUNDRYMETER_POLL_INTERVAL") {
            self.poller.interval_secs = interval.parse().map_err(|_| ConfigError::Env {
                var: "LAUNDRYMETER_POLL_INTERVAL",
                value: interval.clone(),
            })?;
        }
        if let Some(token) = lookup("LAUNDRYMETER_TELEGRAM_TOKEN") {
            match &mut self.telegram {
                Some(telegram) => telegram.bot_token = token,
                None => self.telegram = Some(TelegramConfig::new(token)),
            }
        }
        if let Some(password) = lookup("LAUNDRYMETER_SMTP_PASSWORD") {
            match &mut self.smtp {
                Some(smtp) => smtp.password = Some(password),
                None => {
                    return Err(ConfigError::Invalid(
                        "LAUNDRYMETER_SMTP_PASSWORD set without an [smtp] section".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poller.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poller.interval_secs must be positive".to_string(),
            ));
        }
        if !(self.estimator.threshold_w.is_finite() && self.estimator.threshold_w > 0.0) {
            return Err(ConfigError::Invalid(
                "estimator.threshold_w must be a positive number of watts".to_string(),
            ));
        }
        if self.retention.soft_limit == 0 {
            return Err(ConfigError::Invalid(
                "retention.soft_limit must be positive".to_string(),
            ));
        }
        if self.retention.hard_limit <= self.retention.soft_limit {
            return Err(ConfigError::Invalid(format!(
                "retention.hard_limit ({}) must be above retention.soft_limit ({})",
                self.retention.hard_limit, self.retention.soft_limit
            )));
        }
        if self.sensor.host.is_empty() {
            return Err(ConfigError::Invalid("sensor.host is empty".to_string()));
        }
        if self.sensor.timeout_ms < MIN_SENSOR_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "sensor.timeout_ms must be at least {MIN_SENSOR_TIMEOUT_MS}"
            )));
        }
        if let Some(telegram) = &self.telegram {
            if telegram.bot_token.is_empty() {
                return Err(ConfigError::Invalid("telegram.bot_token is empty".to_string()));
            }
        }
        if let Some(smtp) = &self.smtp {
            if smtp.username.is_some() != smtp.password.is_some() {
                return Err(ConfigError::Invalid(
                    "smtp.username and smtp.password must be set together".to_string(),
                ));
            }
        }
        Ok(())
    }
}

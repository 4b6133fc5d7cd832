//! Deployment configuration read once at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;
use crate::freshness::{DEFAULT_CLOCK_SKEW_S, DEFAULT_MAX_AGE_S, Freshness};
use crate::types::StationKind;

pub const DEFAULT_CONFIG_PATH: &str = "Data/Config.Client.json";
/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "FACTORY_CELL_CONFIG";

/// Upper bound for every configured wait and age.
const MAX_WAIT_MS: u64 = 24 * 60 * 60 * 1000;
const MAX_WAIT_S: f64 = (MAX_WAIT_MS / 1000) as f64;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CellConfig {
    pub station: StationKind,
    pub host: String,
    pub port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub connect_timeout_ms: u64,
    pub notify_interval_ms: u64,
    pub max_age_s: f64,
    pub clock_skew_s: f64,
    pub strict_workpiece: bool,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            station: StationKind::Hbw,
            host: "192.168.0.10".to_string(),
            port: 1883,
            mqtt_user: "txt".to_string(),
            mqtt_pass: "xtx".to_string(),
            connect_timeout_ms: 60_000,
            notify_interval_ms: 10_000,
            max_age_s: DEFAULT_MAX_AGE_S,
            clock_skew_s: DEFAULT_CLOCK_SKEW_S,
            strict_workpiece: false,
        }
    }
}

impl CellConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let config: Self = serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate().map_err(|(field, reason)| ConfigError::Invalid {
            path: path.to_path_buf(),
            field,
            reason,
        })?;
        Ok(config)
    }

    /// Reject timings that cannot be represented as waits on this host.
    fn validate(&self) -> Result<(), (&'static str, &'static str)> {
        if self.connect_timeout_ms == 0 || self.connect_timeout_ms > MAX_WAIT_MS {
            return Err(("connect_timeout_ms", "must be between 1 ms and one day"));
        }
        if self.notify_interval_ms == 0 || self.notify_interval_ms > MAX_WAIT_MS {
            return Err(("notify_interval_ms", "must be between 1 ms and one day"));
        }
        if !(self.max_age_s > 0.0 && self.max_age_s <= MAX_WAIT_S) {
            return Err(("max_age_s", "must be above 0 and at most one day"));
        }
        if !(self.clock_skew_s.abs() <= MAX_WAIT_S) {
            return Err(("clock_skew_s", "must be within one day either way"));
        }
        Ok(())
    }

    pub fn path_from_env() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn notify_interval(&self) -> Duration {
        Duration::from_millis(self.notify_interval_ms)
    }

    pub fn freshness(&self) -> Freshness {
        Freshness::new(self.max_age_s, self.clock_skew_s)
    }
}

//! Client settings loaded with Figment.
//!
//! Settings come from:
//! 1. `config/spisim.toml` (or the file passed with `--config`)
//! 2. Environment variables prefixed with `SPISIM_`, nested keys split on `__`
//!
//! Every field has a default, so an absent file yields a working configuration.
//!
//! # Example
//! ```no_run
//! use spi_sim_client::settings::ClientSettings;
//!
//! let settings = ClientSettings::load()?;
//! println!("Polling logs every {} ms", settings.polling.log_interval_ms);
//! # Ok::<(), figment::Error>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::device::DeviceConfig;
use crate::logs::DEFAULT_MAX_LOG_ENTRIES;

/// Default settings file location.
pub const DEFAULT_SETTINGS_PATH: &str = "config/spisim.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SPISIM_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level client settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Simulator backend connection
    pub backend: BackendSettings,
    /// Poll cadence and bounds
    pub polling: PollingSettings,
    /// Log output
    pub logging: LoggingSettings,
    /// Device configuration the session starts with
    pub device: DeviceConfig,
    /// File export settings
    pub export: ExportSettings,
}

/// Backend connection settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Base URL, e.g. `http://localhost:5001/api`
    pub url: Option<String>,
    /// Per-request timeout; unset leaves the transport default
    pub request_timeout_ms: Option<u64>,
}

/// Poll cadence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// Log poll interval in milliseconds
    pub log_interval_ms: u64,
    /// Status poll interval in milliseconds
    pub status_interval_ms: u64,
    /// Maximum lines kept in the local log view
    pub max_log_entries: usize,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            log_interval_ms: 1000,
            status_interval_ms: 2000,
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
        }
    }
}

impl PollingSettings {
    /// Log poll interval.
    #[must_use]
    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms)
    }

    /// Status poll interval.
    #[must_use]
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (pretty, compact, json)
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Directory exports are written to
    pub directory: PathBuf,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
        }
    }
}

impl ClientSettings {
    /// Load settings from [`DEFAULT_SETTINGS_PATH`] and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_SETTINGS_PATH)
    }

    /// Load settings from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate settings after loading
    pub fn validate(&self) -> Result<(), String> {
        let level = self.logging.level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LEVELS.join(", ")
            ));
        }

        let format = self.logging.format.to_lowercase();
        if !VALID_FORMATS.contains(&format.as_str()) {
            return Err(format!(
                "Invalid logging.format '{}'. Must be one of: {}",
                self.logging.format,
                VALID_FORMATS.join(", ")
            ));
        }

        if self.polling.log_interval_ms == 0 || self.polling.status_interval_ms == 0 {
            return Err("Poll intervals must be greater than 0".to_string());
        }
        if self.polling.max_log_entries == 0 {
            return Err("polling.max_log_entries must be greater than 0".to_string());
        }

        self.device.validate().map_err(|e| format!("Invalid device: {e}"))?;
        Ok(())
    }
}

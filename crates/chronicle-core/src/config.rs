//! Configuration loading and typed config structures.
//!
//! A world is configured from a YAML file (conventionally
//! `chronicle.yaml`). Every section and field has a default, so an empty
//! file is a valid configuration: manual turns, a history called
//! `Chronicle`, and `info` logging.

use std::path::Path;

use chronicle_types::Progress;
use serde::Deserialize;

/// Environment variable overriding [`LoggingConfig::level`].
pub const LOG_LEVEL_ENV: &str = "CHRONICLE_LOG";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChronicleConfig {
    /// Turn progression settings.
    #[serde(default)]
    pub turns: TurnConfig,

    /// History settings.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ChronicleConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `CHRONICLE_LOG`, when set, overrides `logging.level`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.logging.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }
}

/// Turn configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TurnConfig {
    /// How turns progress when the world starts.
    #[serde(default)]
    pub progress: ProgressConfig,
}

/// Progress mode as written in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// Turns only on request.
    #[default]
    Manual,
    /// Turns on a timer.
    Automatic,
}

/// Starting progress of the turn clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ProgressConfig {
    /// Manual or automatic.
    #[serde(default)]
    pub mode: ProgressMode,

    /// Gap between automatic turns in milliseconds. Ignored when manual.
    #[serde(default = "default_period_ms")]
    pub period_ms: u32,
}

impl ProgressConfig {
    /// The clock progress this configuration describes.
    pub const fn to_progress(self) -> Progress {
        match self.mode {
            ProgressMode::Manual => Progress::Manual,
            ProgressMode::Automatic => Progress::Automatic {
                milliseconds: self.period_ms,
            },
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            mode: ProgressMode::default(),
            period_ms: default_period_ms(),
        }
    }
}

/// History configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryConfig {
    /// Name given to a fresh history when the store has none.
    #[serde(default = "default_history_name")]
    pub default_name: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_name: default_history_name(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    /// Override the level with `CHRONICLE_LOG` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(LOG_LEVEL_ENV) {
            self.level = val;
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

const fn default_period_ms() -> u32 {
    1000
}

fn default_history_name() -> String {
    "Chronicle".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

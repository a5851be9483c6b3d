//! Structured logging setup.
//!
//! Installs a global `tracing` subscriber. `RUST_LOG` takes precedence over
//! the configured level so a single run can be made noisier without editing
//! configuration.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;

use crate::config::LoggingConfig;

/// Errors that can occur while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured level is not a valid filter directive.
    #[error("invalid log filter `{directive}`: {source}")]
    Filter {
        /// The directive as configured.
        directive: String,
        /// Why it did not parse.
        source: ParseError,
    },

    /// A global subscriber is already installed.
    #[error("failed to install log subscriber: {message}")]
    Install {
        /// Description from `tracing-subscriber`.
        message: String,
    },
}

/// The filter logging will use: `RUST_LOG` if set and valid, else the
/// configured level.
pub fn filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(&config.level).map_err(|source| TelemetryError::Filter {
            directive: config.level.clone(),
            source,
        })
    })
}

/// Install the global subscriber described by `config`.
pub fn init(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config)?)
        .with_target(true);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|source| TelemetryError::Install {
        message: source.to_string(),
    })
}

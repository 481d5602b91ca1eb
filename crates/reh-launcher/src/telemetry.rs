//! Structured telemetry initialisation for the launcher.
//!
//! Diagnostics always go to stderr; stdout is reserved for the status report
//! and the dry-run argument vector, which callers may parse. Once the
//! launcher detaches, stderr points at `/dev/null`, so the service log file
//! is the only durable output of a background run.

use std::env;
use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use reh_config::{Config, LogFormat};
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Environment variable whose directive replaces the configured `log_filter`.
pub const LOG_FILTER_ENV: &str = "REH_LAUNCHER_LOG";

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The filter expression did not parse.
    #[error("invalid log filter '{directive}': {message}")]
    Filter { directive: String, message: String },
    /// The global subscriber could not be installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global tracing subscriber on first use.
///
/// A non-empty [`LOG_FILTER_ENV`] wins over the configured filter, which
/// lets an operator raise verbosity for one launch without editing the
/// configuration file. Later calls leave the installed subscriber alone.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| {
            let directive = filter_directive(config, env::var(LOG_FILTER_ENV).ok());
            install_subscriber(&directive, config.log_format())
        })
        .map(|_| TelemetryHandle)
}

fn filter_directive(config: &Config, env_override: Option<String>) -> String {
    env_override
        .filter(|directive| !directive.trim().is_empty())
        .unwrap_or_else(|| config.log_filter().to_owned())
}

fn parse_filter(directive: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directive).map_err(|error| TelemetryError::Filter {
        directive: directive.to_owned(),
        message: error.to_string(),
    })
}

fn install_subscriber(directive: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let filter = parse_filter(directive)?;
    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match format {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

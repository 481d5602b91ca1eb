//! Error types for the launcher entrypoint.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::process::LaunchError;
use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to change into working directory '{path}': {source}")]
    Workdir { path: PathBuf, source: io::Error },
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(#[from] reh_config::ConfigError),
    #[error("failed to initialise logging: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("{0}")]
    Launch(#[from] LaunchError),
}

//! Typed configuration for the REH launcher.
//!
//! Configuration is read once from a JSON file, merged with the documented
//! defaults by the pure [`Config::resolve`] function, and then passed by
//! reference to every launcher component. Nothing here is global: callers
//! own the resolved [`Config`] value for the lifetime of the run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

pub mod defaults;
mod logging;
mod runtime;

pub use defaults::{DEFAULT_CONFIG_FILE, PID_PLACEHOLDER};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::DirectoryPreparationError;

/// Configuration exactly as it appears in the file; every key is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RawConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub token: Option<String>,
    pub data_dir: Option<Utf8PathBuf>,
    pub ext_dir: Option<Utf8PathBuf>,
    pub extract_dir: Option<Utf8PathBuf>,
    pub pidfile: Option<Utf8PathBuf>,
    pub logfile: Option<Utf8PathBuf>,
    pub extra_args: Option<Vec<String>>,
    pub log_filter: Option<String>,
    pub log_format: Option<LogFormat>,
}

/// Fully resolved launcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address the managed service binds.
    pub host: String,
    /// Port the managed service listens on.
    pub port: u16,
    /// Connection token; `None` starts the service without authentication.
    pub token: Option<String>,
    /// Service data directory.
    pub data_dir: Utf8PathBuf,
    /// Service extensions directory.
    pub ext_dir: Utf8PathBuf,
    /// Directory holding the extracted artifact.
    pub extract_dir: Utf8PathBuf,
    /// Lock/record file guarding the single running instance.
    pub pidfile: Utf8PathBuf,
    /// Log file template; `%pid` is replaced with the supervisor PID.
    pub logfile: Utf8PathBuf,
    /// Opaque arguments appended to the service command line.
    pub extra_args: Vec<String>,
    /// Tracing filter expression for the launcher's own diagnostics.
    pub log_filter: String,
    /// Output format for the launcher's own diagnostics.
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: defaults::DEFAULT_HOST.to_owned(),
            port: defaults::DEFAULT_PORT,
            token: None,
            data_dir: defaults::default_data_dir(),
            ext_dir: defaults::default_ext_dir(),
            extract_dir: Utf8PathBuf::from(defaults::DEFAULT_EXTRACT_DIR),
            pidfile: Utf8PathBuf::from(defaults::DEFAULT_PIDFILE),
            logfile: defaults::default_logfile(),
            extra_args: Vec::new(),
            log_filter: defaults::DEFAULT_LOG_FILTER.to_owned(),
            log_format: defaults::default_log_format(),
        }
    }
}

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read configuration file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The file is not a valid configuration document.
    #[error("invalid configuration file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// A directory named by the configuration could not be created.
    #[error(transparent)]
    Directory(#[from] DirectoryPreparationError),
}

impl Config {
    /// Merges raw file values over `defaults`, option by option.
    ///
    /// This is a pure function: it performs no IO and never fails. An absent
    /// `token` stays absent because the service treats "no token" as an
    /// explicit mode rather than a missing value.
    #[must_use]
    pub fn resolve(raw: RawConfig, defaults: Self) -> Self {
        Self {
            host: raw.host.unwrap_or(defaults.host),
            port: raw.port.unwrap_or(defaults.port),
            token: raw.token.or(defaults.token),
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
            ext_dir: raw.ext_dir.unwrap_or(defaults.ext_dir),
            extract_dir: raw.extract_dir.unwrap_or(defaults.extract_dir),
            pidfile: raw.pidfile.unwrap_or(defaults.pidfile),
            logfile: raw.logfile.unwrap_or(defaults.logfile),
            extra_args: raw.extra_args.unwrap_or(defaults.extra_args),
            log_filter: raw.log_filter.unwrap_or(defaults.log_filter),
            log_format: raw.log_format.unwrap_or(defaults.log_format),
        }
    }

    /// Reads `path` and resolves it against [`Config::default`].
    ///
    /// A missing file is not an error: every option takes its default.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(text) => parse_raw(path, &text)?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => RawConfig::default(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Ok(Self::resolve(raw, Self::default()))
    }

    /// Loads the configuration and eagerly creates the directories it names.
    pub fn load_and_prepare(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.prepare_filesystem()?;
        Ok(config)
    }

    /// Path of the lock/record file.
    #[must_use]
    pub fn pidfile(&self) -> &Utf8Path {
        &self.pidfile
    }

    /// Directory the platform artifact is extracted into.
    #[must_use]
    pub fn extract_dir(&self) -> &Utf8Path {
        &self.extract_dir
    }

    /// Log filter expression handed to the tracing subscriber.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Output format for diagnostic logging.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

fn parse_raw(path: &Path, text: &str) -> Result<RawConfig, ConfigError> {
    serde_json::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

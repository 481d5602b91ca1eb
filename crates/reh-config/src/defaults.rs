//! Documented defaults for every recognised configuration option.

use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Configuration file consulted when `--config` is not supplied.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Base directory for the managed service's mutable state.
pub const DEFAULT_BASE_DATA_DIR: &str = "./server-data";

/// Address the managed service binds when no host is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port the managed service listens on when no port is configured.
pub const DEFAULT_PORT: u16 = 3250;

/// Lock/record file guarding the single running instance.
pub const DEFAULT_PIDFILE: &str = "run.pid";

/// Directory the platform artifact is extracted into.
pub const DEFAULT_EXTRACT_DIR: &str = ".";

/// Placeholder substituted with the supervisor's PID in the log file path.
pub const PID_PLACEHOLDER: &str = "%pid";

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default service data directory.
#[must_use]
pub fn default_data_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_BASE_DATA_DIR).join("data")
}

/// Default service extensions directory.
#[must_use]
pub fn default_ext_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_BASE_DATA_DIR).join("extensions")
}

/// Default log file template; `%pid` is replaced at start time.
#[must_use]
pub fn default_logfile() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_BASE_DATA_DIR).join(format!("reh-{PID_PLACEHOLDER}.log"))
}

/// Default logging format for the binary.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

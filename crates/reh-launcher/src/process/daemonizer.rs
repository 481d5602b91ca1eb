//! Detaches the supervisor from its controlling terminal.
//!
//! `daemonize-me` performs the double fork, starts a new session and points
//! the standard streams at `/dev/null`. Its intermediate parents leave through
//! `exit`, so the instance lock inherited through the shared open file
//! description stays held by the surviving process.

use std::env;
use std::ffi::OsStr;
use std::io;

use daemonize_me::Daemon;
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// Abstraction over daemonisation strategies.
pub trait Daemonizer {
    /// Detaches the process into the background.
    ///
    /// Returns only in the fully detached process.
    fn daemonize(&self) -> Result<(), DaemonizeError>;
}

/// Errors surfaced by the daemonisation backend.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// The launcher's working directory could not be determined.
    #[error("failed to resolve the working directory: {source}")]
    WorkDir {
        #[source]
        source: io::Error,
    },
    /// System-level daemonisation failed.
    #[error("{0}")]
    System(#[from] daemonize_me::DaemonError),
}

/// Daemoniser that delegates to `daemonize-me`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDaemonizer;

impl SystemDaemonizer {
    /// Builds a new system daemoniser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self) -> Result<(), DaemonizeError> {
        // Configured paths may be relative to the launch directory.
        let work_dir = env::current_dir().map_err(|source| DaemonizeError::WorkDir { source })?;
        info!(
            target: PROCESS_TARGET,
            work_dir = %work_dir.display(),
            "daemonising into background"
        );
        Daemon::new()
            .work_dir(&work_dir)
            .name(OsStr::new(env!("CARGO_PKG_NAME")))
            .start()?;
        info!(
            target: PROCESS_TARGET,
            pid = std::process::id(),
            "daemon process detached; continuing in child"
        );
        Ok(())
    }
}

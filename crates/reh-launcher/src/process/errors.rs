//! Unified error surface for the supervisor lifecycle.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::artifact::{ArtifactError, InstallError};

use super::child::ChildError;
use super::daemonizer::DaemonizeError;
use super::lock::{LockError, LockRecordError};
use super::multiplexer::MonitorError;
use super::peer::PeerSignalError;
use super::shutdown::ShutdownError;

/// Errors surfaced while deciding, launching or supervising the service.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// No usable artifact could be located or its version read.
    #[error("{source}")]
    Artifact {
        /// Underlying artifact error.
        #[source]
        source: ArtifactError,
    },
    /// Replacing the extracted artifact failed.
    #[error("failed to install artifact: {source}")]
    Install {
        /// Underlying install error.
        #[source]
        source: InstallError,
    },
    /// The instance lock could not be opened or taken.
    #[error("{source}")]
    Lock {
        /// Underlying lock error.
        #[source]
        source: LockError,
    },
    /// The instance record could not be read or written.
    #[error("{source}")]
    Record {
        /// Underlying record error.
        #[source]
        source: LockRecordError,
    },
    /// The running instance could not be asked to stop.
    #[error("failed to stop existing instance: {source}")]
    Peer {
        /// Underlying signalling error.
        #[source]
        source: PeerSignalError,
    },
    /// Daemonisation failed.
    #[error("failed to daemonise: {source}")]
    Daemonize {
        /// Underlying daemonisation error.
        #[source]
        source: DaemonizeError,
    },
    /// Signal handlers could not be installed.
    #[error("failed to install shutdown handling: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
    /// The service log file could not be opened.
    #[error("failed to open log file '{path}': {source}")]
    LogOpen {
        /// Log file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Starting or reaping the service failed.
    #[error("{source}")]
    Child {
        /// Underlying child process error.
        #[source]
        source: ChildError,
    },
    /// Monitoring the service's output failed.
    #[error("service monitoring failed: {source}")]
    Monitor {
        /// Underlying monitoring error.
        #[source]
        source: MonitorError,
    },
    /// Writing user-facing output failed.
    #[error("failed to write launcher output: {source}")]
    Output {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl From<ArtifactError> for LaunchError {
    fn from(source: ArtifactError) -> Self {
        Self::Artifact { source }
    }
}

impl From<InstallError> for LaunchError {
    fn from(source: InstallError) -> Self {
        Self::Install { source }
    }
}

impl From<LockError> for LaunchError {
    fn from(source: LockError) -> Self {
        Self::Lock { source }
    }
}

impl From<LockRecordError> for LaunchError {
    fn from(source: LockRecordError) -> Self {
        Self::Record { source }
    }
}

impl From<PeerSignalError> for LaunchError {
    fn from(source: PeerSignalError) -> Self {
        Self::Peer { source }
    }
}

impl From<DaemonizeError> for LaunchError {
    fn from(source: DaemonizeError) -> Self {
        Self::Daemonize { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}

impl From<ChildError> for LaunchError {
    fn from(source: ChildError) -> Self {
        Self::Child { source }
    }
}

impl From<MonitorError> for LaunchError {
    fn from(source: MonitorError) -> Self {
        Self::Monitor { source }
    }
}

impl From<io::Error> for LaunchError {
    fn from(source: io::Error) -> Self {
        Self::Output { source }
    }
}

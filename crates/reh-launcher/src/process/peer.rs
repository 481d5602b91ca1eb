//! Requests that a peer supervisor stop so a newer artifact can take over.

use std::process;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{info, warn};

use super::PROCESS_TARGET;

/// Abstraction over how a running peer is asked to exit.
pub trait PeerSignaller {
    /// Sends a termination request to the supervisor with `pid`.
    fn request_stop(&self, pid: u32) -> Result<(), PeerSignalError>;
}

/// Errors raised while signalling a peer supervisor.
#[derive(Debug, Error)]
pub enum PeerSignalError {
    /// The recorded PID cannot name a single foreign process.
    #[error("refusing to signal invalid peer pid {pid}")]
    InvalidPid { pid: u32 },
    /// The signal could not be delivered.
    #[error("failed to signal peer pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: Errno,
    },
}

/// Peer signaller that sends `SIGTERM` with `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPeerSignaller;

impl PeerSignaller for SystemPeerSignaller {
    fn request_stop(&self, pid: u32) -> Result<(), PeerSignalError> {
        let target = peer_pid(pid)?;
        info!(
            target: PROCESS_TARGET,
            pid,
            "requesting running instance to stop"
        );
        match kill(target, Signal::SIGTERM) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                // Already gone; the lock wait that follows returns at once.
                warn!(
                    target: PROCESS_TARGET,
                    pid,
                    "running instance exited before it could be signalled"
                );
                Ok(())
            }
            Err(source) => Err(PeerSignalError::Signal { pid, source }),
        }
    }
}

// PID 0 and negative values address process groups, not a single peer.
fn peer_pid(pid: u32) -> Result<Pid, PeerSignalError> {
    let raw = i32::try_from(pid).map_err(|_| PeerSignalError::InvalidPid { pid })?;
    if raw <= 0 || pid == process::id() {
        return Err(PeerSignalError::InvalidPid { pid });
    }
    Ok(Pid::from_raw(raw))
}

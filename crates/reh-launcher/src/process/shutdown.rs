//! Converts termination signals into a cancellation the monitoring loop can
//! wait on.
//!
//! Signal handlers only write a byte into a socket pair. The read end is a
//! plain descriptor that the readiness wait polls alongside the service's
//! output streams, so a termination request surfaces as a distinguishable
//! "cancelled" outcome instead of an error unwinding through the loop.

use std::io::{self, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::low_level::pipe;
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// Signals treated as a request to stop the supervisor.
pub const TERMINATION_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal {
    /// Arms the notification and returns the listener to wait on.
    fn install(&self) -> Result<ShutdownListener, ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Readable end of the cancellation channel.
///
/// The descriptor becomes readable once shutdown is requested and stays
/// readable; repeated requests change nothing.
#[derive(Debug)]
pub struct ShutdownListener {
    receiver: UnixStream,
}

/// Writable end of the cancellation channel.
#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: UnixStream,
}

impl ShutdownListener {
    /// Creates a connected listener and trigger.
    pub fn channel() -> io::Result<(Self, ShutdownTrigger)> {
        let (receiver, sender) = UnixStream::pair()?;
        receiver.set_nonblocking(true)?;
        sender.set_nonblocking(true)?;
        Ok((Self { receiver }, ShutdownTrigger { sender }))
    }

    /// Waits up to `timeout` for a shutdown request.
    ///
    /// Returns `true` once a request is pending. An interrupted wait reports
    /// `false` so callers simply try again.
    pub fn wait_for(&self, timeout: PollTimeout) -> io::Result<bool> {
        let mut fds = [PollFd::new(self.receiver.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, timeout) {
            Ok(0) | Err(Errno::EINTR) => Ok(false),
            Ok(_) => Ok(fds
                .iter()
                .any(|fd| fd.revents().is_some_and(|events| !events.is_empty()))),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }
}

impl AsFd for ShutdownListener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.receiver.as_fd()
    }
}

impl ShutdownTrigger {
    /// Requests shutdown. Safe to call any number of times.
    pub fn trigger(&self) -> io::Result<()> {
        match (&self.sender).write(&[1]) {
            Ok(_) => Ok(()),
            // A full buffer already holds a pending request.
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(error) => Err(error),
        }
    }
}

/// Shutdown listener driven by process termination signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl SystemShutdownSignal {
    /// Builds a signal-backed shutdown source.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn install(&self) -> Result<ShutdownListener, ShutdownError> {
        let install_error = |source| ShutdownError::Install { source };
        let (listener, trigger) = ShutdownListener::channel().map_err(install_error)?;
        for signal in TERMINATION_SIGNALS {
            let sender = trigger.sender.try_clone().map_err(install_error)?;
            pipe::register(signal, sender).map_err(install_error)?;
        }
        info!(
            target: PROCESS_TARGET,
            signals = ?TERMINATION_SIGNALS,
            "termination signal handlers installed"
        );
        Ok(listener)
    }
}

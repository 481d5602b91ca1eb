//! Relays the service's stdout and stderr into the log file.
//!
//! A single thread waits for readiness on the cancellation descriptor and
//! both output streams, then drains whichever streams are ready without
//! blocking. Each stream has its own buffer so output is never interleaved
//! within a chunk. Failures to relay one chunk are logged and skipped; only a
//! failed readiness wait aborts the loop.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use thiserror::Error;
use tracing::{debug, warn};

use super::PROCESS_TARGET;
use super::shutdown::ShutdownListener;

const READ_BUFFER_SIZE: usize = 4096;

/// Identifies one of the service's output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

/// Why the monitoring loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Shutdown was requested.
    Cancelled,
    /// Both output streams reached end-of-file.
    StreamsClosed,
}

/// Fatal failures of the monitoring loop.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A stream could not be switched to non-blocking mode.
    #[error("failed to make service {stream} non-blocking: {source}")]
    NonBlocking {
        stream: StreamKind,
        #[source]
        source: Errno,
    },
    /// The readiness wait itself failed.
    #[error("failed waiting for service output: {source}")]
    Poll {
        #[source]
        source: Errno,
    },
}

/// Per-chunk failures that are logged and skipped.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Reading the stream failed; the stream is treated as closed.
    #[error("failed to read service {stream}: {source}")]
    Read {
        stream: StreamKind,
        #[source]
        source: io::Error,
    },
    /// Appending to the log file failed.
    #[error("failed to append service {stream} to the log file: {source}")]
    Log {
        stream: StreamKind,
        #[source]
        source: io::Error,
    },
    /// Echoing to the console failed.
    #[error("failed to echo service {stream} to the console: {source}")]
    Console {
        stream: StreamKind,
        #[source]
        source: io::Error,
    },
}

/// The service's captured output streams.
#[derive(Debug)]
pub struct OutputStreams {
    stdout: File,
    stderr: File,
}

impl OutputStreams {
    /// Wraps the read ends of the service's stdout and stderr.
    #[must_use]
    pub fn new(stdout: File, stderr: File) -> Self {
        Self { stdout, stderr }
    }
}

/// Console sinks that receive a copy of every relayed chunk.
#[derive(Debug)]
pub struct Console<O, E> {
    stdout: O,
    stderr: E,
}

impl<O: Write, E: Write> Console<O, E> {
    /// Pairs the writers that mirror the service's stdout and stderr.
    pub fn new(stdout: O, stderr: E) -> Self {
        Self { stdout, stderr }
    }

    fn echo(&mut self, stream: StreamKind, chunk: &[u8]) -> io::Result<()> {
        match stream {
            StreamKind::Stdout => write_through(&mut self.stdout, chunk),
            StreamKind::Stderr => write_through(&mut self.stderr, chunk),
        }
    }
}

fn write_through(sink: &mut impl Write, chunk: &[u8]) -> io::Result<()> {
    sink.write_all(chunk)?;
    sink.flush()
}

struct Channel {
    kind: StreamKind,
    source: File,
    buffer: Box<[u8]>,
    open: bool,
}

impl Channel {
    fn new(kind: StreamKind, source: File) -> Result<Self, MonitorError> {
        set_nonblocking(&source)
            .map_err(|source| MonitorError::NonBlocking { stream: kind, source })?;
        Ok(Self {
            kind,
            source,
            buffer: vec![0; READ_BUFFER_SIZE].into_boxed_slice(),
            open: true,
        })
    }

    fn close(&mut self) {
        self.open = false;
        debug!(target: PROCESS_TARGET, stream = %self.kind, "service stream closed");
    }
}

fn set_nonblocking(file: &File) -> Result<(), Errno> {
    let fd = file.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

struct Readiness {
    cancelled: bool,
    ready: Vec<StreamKind>,
}

/// Copies service output to the log file and, optionally, the console.
#[derive(Debug)]
pub struct LogMultiplexer<O, E> {
    log: File,
    console: Option<Console<O, E>>,
}

impl<O: Write, E: Write> LogMultiplexer<O, E> {
    /// Builds a multiplexer writing to `log`; `console` enables echoing.
    pub fn new(log: File, console: Option<Console<O, E>>) -> Self {
        Self { log, console }
    }

    /// Relays output until shutdown is requested or both streams close.
    ///
    /// A pending cancellation wins over pending output: the loop returns
    /// without draining further once the listener is readable.
    pub fn run(
        &mut self,
        streams: OutputStreams,
        cancel: &ShutdownListener,
    ) -> Result<MonitorOutcome, MonitorError> {
        let mut channels = [
            Channel::new(StreamKind::Stdout, streams.stdout)?,
            Channel::new(StreamKind::Stderr, streams.stderr)?,
        ];
        loop {
            if channels.iter().all(|channel| !channel.open) {
                return Ok(MonitorOutcome::StreamsClosed);
            }
            let readiness = wait_for_readiness(cancel.as_fd(), &channels)?;
            if readiness.cancelled {
                debug!(target: PROCESS_TARGET, "monitoring cancelled");
                return Ok(MonitorOutcome::Cancelled);
            }
            for channel in channels
                .iter_mut()
                .filter(|channel| readiness.ready.contains(&channel.kind))
            {
                self.drain(channel);
            }
        }
    }

    fn drain(&mut self, channel: &mut Channel) {
        loop {
            match channel.source.read(&mut channel.buffer) {
                Ok(0) => {
                    channel.close();
                    return;
                }
                Ok(read) => {
                    let chunk = channel.buffer.get(..read).unwrap_or_default();
                    self.relay(channel.kind, chunk);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    report(&RelayError::Read {
                        stream: channel.kind,
                        source,
                    });
                    channel.close();
                    return;
                }
            }
        }
    }

    fn relay(&mut self, stream: StreamKind, chunk: &[u8]) {
        if let Err(source) = write_through(&mut self.log, chunk) {
            report(&RelayError::Log { stream, source });
        }
        if let Some(console) = self.console.as_mut() {
            if let Err(source) = console.echo(stream, chunk) {
                report(&RelayError::Console { stream, source });
            }
        }
    }
}

fn report(error: &RelayError) {
    warn!(target: PROCESS_TARGET, error = %error, "service output relay failed");
}

fn wait_for_readiness(
    cancel: BorrowedFd<'_>,
    channels: &[Channel],
) -> Result<Readiness, MonitorError> {
    // Closed streams are left out; a hung-up pipe would otherwise report
    // readiness forever.
    let open: Vec<&Channel> = channels.iter().filter(|channel| channel.open).collect();
    let mut fds = Vec::with_capacity(open.len() + 1);
    fds.push(PollFd::new(cancel, PollFlags::POLLIN));
    fds.extend(
        open.iter()
            .map(|channel| PollFd::new(channel.source.as_fd(), PollFlags::POLLIN)),
    );
    loop {
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => break,
            Err(Errno::EINTR) => {}
            Err(source) => return Err(MonitorError::Poll { source }),
        }
    }
    let mut flags = fds.iter().map(|fd| fd.revents().is_some_and(is_readable));
    let cancelled = flags.next().unwrap_or(false);
    let ready = open
        .iter()
        .zip(flags)
        .filter_map(|(channel, readable)| readable.then_some(channel.kind))
        .collect();
    Ok(Readiness { cancelled, ready })
}

// Hang-ups and errors count as readable so the following read observes them.
fn is_readable(events: PollFlags) -> bool {
    events.intersects(
        PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL,
    )
}

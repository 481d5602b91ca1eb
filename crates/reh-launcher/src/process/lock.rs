//! Singleton enforcement through an exclusive lock on the record file.
//!
//! The same file carries the lock and the [`InstanceRecord`] of the process
//! holding it. Only the lock holder writes the record, so mutual exclusion
//! alone guarantees readers never observe a half-written record. The lock is
//! an advisory `flock(2)` lock scoped to the open file description: the
//! kernel releases it when the holder exits by any means. A record that
//! outlived its holder is discarded the moment the lock changes hands.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::PROCESS_TARGET;
use crate::version::Version;

/// Identity of the supervisor currently holding the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// PID of the supervising process.
    pub pid: u32,
    /// Version of the artifact the supervisor launched, if known.
    pub version: Option<Version>,
}

/// Outcome of a non-blocking acquisition attempt.
#[derive(Debug)]
pub enum LockAttempt {
    /// This process now holds the lock.
    Acquired(LockHandle),
    /// Another process holds the lock.
    Busy,
}

/// Outcome of a side-effect-free lock probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockProbe {
    /// No process holds the lock.
    Vacant,
    /// Another process holds the lock.
    Busy,
}

/// Errors raised while opening or locking the record file.
#[derive(Debug, Error)]
pub enum LockError {
    /// The record file could not be opened.
    #[error("failed to open lock file '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The lock syscall failed for a reason other than contention.
    #[error("failed to lock '{path}': {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: Errno,
    },
    /// A record left behind by a previous holder could not be discarded.
    #[error("failed to reset stale record in '{path}': {source}")]
    Reset {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors raised while reading or writing the instance record.
#[derive(Debug, Error)]
pub enum LockRecordError {
    /// The record file could not be read or written.
    #[error("failed to access instance record '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The record is not a valid JSON instance record.
    #[error("malformed instance record '{path}': {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The lock is held but its holder has not written a record yet.
    #[error("instance record '{path}' is empty; another launch may still be starting")]
    Empty { path: PathBuf },
}

/// Exclusive, process-lifetime lock over the instance record file.
#[derive(Debug, Clone)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Guards the record file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Attempts to take the lock without blocking, creating the file if needed.
    pub fn try_acquire(&self) -> Result<LockAttempt, LockError> {
        let file = self.open(true)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                info!(
                    target: PROCESS_TARGET,
                    file = %self.path.display(),
                    "acquired instance lock"
                );
                Ok(LockAttempt::Acquired(self.handle(lock)?))
            }
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                debug!(
                    target: PROCESS_TARGET,
                    file = %self.path.display(),
                    "instance lock is busy"
                );
                Ok(LockAttempt::Busy)
            }
            Err((_, source)) => Err(self.lock_error(source)),
        }
    }

    /// Blocks until the lock is free, then takes it.
    ///
    /// Used only to wait for a peer instance to finish shutting down.
    pub fn acquire_blocking(&self) -> Result<LockHandle, LockError> {
        info!(
            target: PROCESS_TARGET,
            file = %self.path.display(),
            "waiting for instance lock"
        );
        let mut file = self.open(true)?;
        loop {
            match Flock::lock(file, FlockArg::LockExclusive) {
                Ok(lock) => {
                    info!(
                        target: PROCESS_TARGET,
                        file = %self.path.display(),
                        "acquired instance lock after wait"
                    );
                    return self.handle(lock);
                }
                Err((returned, Errno::EINTR)) => file = returned,
                Err((_, source)) => return Err(self.lock_error(source)),
            }
        }
    }

    /// Reports whether the lock is held without creating the record file.
    ///
    /// A momentary lock taken to test for contention is released before
    /// returning, so nothing persists.
    pub fn probe(&self) -> Result<LockProbe, LockError> {
        let file = match self.open(false) {
            Ok(file) => file,
            Err(LockError::Open { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                return Ok(LockProbe::Vacant);
            }
            Err(error) => return Err(error),
        };
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(_released_on_drop) => Ok(LockProbe::Vacant),
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(LockProbe::Busy),
            Err((_, source)) => Err(self.lock_error(source)),
        }
    }

    /// Reads the record written by the current lock holder.
    ///
    /// Only meaningful after observing [`LockAttempt::Busy`] or
    /// [`LockProbe::Busy`]: lock contention is what makes the record
    /// trustworthy, never the record's content.
    pub fn read_peer_record(&self) -> Result<InstanceRecord, LockRecordError> {
        let mut file = File::open(&self.path).map_err(|source| self.record_io(source))?;
        read_record(&self.path, &mut file)?.ok_or_else(|| LockRecordError::Empty {
            path: self.path.clone(),
        })
    }

    fn open(&self, create: bool) -> Result<File, LockError> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(create).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(&self.path).map_err(|source| LockError::Open {
            path: self.path.clone(),
            source,
        })
    }

    /// Wraps a fresh lock, discarding whatever record a dead holder left.
    fn handle(&self, lock: Flock<File>) -> Result<LockHandle, LockError> {
        lock.set_len(0).map_err(|source| LockError::Reset {
            path: self.path.clone(),
            source,
        })?;
        Ok(LockHandle {
            path: self.path.clone(),
            file: lock,
        })
    }

    fn lock_error(&self, source: Errno) -> LockError {
        LockError::Lock {
            path: self.path.clone(),
            source,
        }
    }

    fn record_io(&self, source: io::Error) -> LockRecordError {
        LockRecordError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Proof of lock ownership; dropping it releases the lock.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    file: Flock<File>,
}

impl LockHandle {
    /// Reads the record, returning `None` while the file is still empty.
    pub fn read_record(&mut self) -> Result<Option<InstanceRecord>, LockRecordError> {
        read_record(&self.path, &mut self.file)
    }

    /// Replaces the record in place.
    pub fn write_record(&mut self, record: &InstanceRecord) -> Result<(), LockRecordError> {
        let payload = serde_json::to_vec(record).map_err(|source| LockRecordError::Malformed {
            path: self.path.clone(),
            source,
        })?;
        let io_error = |source| LockRecordError::Io {
            path: self.path.clone(),
            source,
        };
        self.file.set_len(0).map_err(io_error)?;
        self.file.seek(SeekFrom::Start(0)).map_err(io_error)?;
        self.file.write_all(&payload).map_err(io_error)?;
        self.file.flush().map_err(io_error)?;
        self.file.sync_data().map_err(io_error)?;
        info!(
            target: PROCESS_TARGET,
            pid = record.pid,
            version = ?record.version.map(|version| version.to_string()),
            file = %self.path.display(),
            "instance record written"
        );
        Ok(())
    }

    /// Empties the record while keeping the lock held.
    pub fn clear_record(&mut self) -> Result<(), LockRecordError> {
        self.file.set_len(0).map_err(|source| LockRecordError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            target: PROCESS_TARGET,
            file = %self.path.display(),
            "instance record cleared"
        );
        Ok(())
    }
}

fn read_record(path: &Path, file: &mut File) -> Result<Option<InstanceRecord>, LockRecordError> {
    let io_error = |source| LockRecordError::Io {
        path: path.to_path_buf(),
        source,
    };
    file.seek(SeekFrom::Start(0)).map_err(io_error)?;
    let mut content = String::new();
    file.read_to_string(&mut content).map_err(io_error)?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| LockRecordError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

//! Injected stand-ins for the launcher's process-level collaborators.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::archive::{ArchiveError, ArchiveTool};
use crate::process::daemonizer::{DaemonizeError, Daemonizer};
use crate::process::lock::LockHandle;
use crate::process::peer::{PeerSignalError, PeerSignaller};
use crate::process::shutdown::{
    ShutdownError, ShutdownListener, ShutdownSignal, ShutdownTrigger,
};

use super::launcher_world::ARTIFACT_NAME;

/// Writes an extracted artifact whose service is a shell script.
pub fn write_service(dir: &Path, version: &str, script: &str) -> io::Result<()> {
    let bin = dir.join("bin");
    fs::create_dir_all(&bin)?;
    fs::write(
        dir.join("package.json"),
        format!(r#"{{"name":"reh","version":"{version}"}}"#),
    )?;
    let binary = bin.join("code-server-oss");
    fs::write(&binary, format!("#!/bin/sh\n{script}\n"))?;
    fs::set_permissions(&binary, fs::Permissions::from_mode(0o755))
}

/// Archive tool whose "archives" are plain files holding a version string.
#[derive(Clone)]
pub struct FakeArchiveTool {
    script: Arc<Mutex<String>>,
    extractions: Arc<AtomicUsize>,
}

impl FakeArchiveTool {
    pub fn new(script: &str) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.to_owned())),
            extractions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn extractions(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }

    fn version(archive: &Path) -> Result<String, ArchiveError> {
        fs::read_to_string(archive)
            .map(|contents| contents.trim().to_owned())
            .map_err(|source| ArchiveError::Spawn {
                tool: "fake-unzip".to_owned(),
                archive: archive.to_path_buf(),
                source,
            })
    }
}

impl ArchiveTool for FakeArchiveTool {
    fn read_member(&self, archive: &Path, member: &str) -> Result<Vec<u8>, ArchiveError> {
        assert_eq!(member, format!("{ARTIFACT_NAME}/package.json"));
        let version = Self::version(archive)?;
        Ok(format!(r#"{{"version":"{version}"}}"#).into_bytes())
    }

    fn extract(&self, archive: &Path, destination: &Path) -> Result<(), ArchiveError> {
        let version = Self::version(archive)?;
        let script = self.script.lock().expect("script mutex poisoned").clone();
        write_service(&destination.join(ARTIFACT_NAME), &version, &script).map_err(|source| {
            ArchiveError::Spawn {
                tool: "fake-unzip".to_owned(),
                archive: archive.to_path_buf(),
                source,
            }
        })?;
        self.extractions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Daemoniser that only counts how often it was asked to detach.
#[derive(Clone, Default)]
pub struct TestDaemonizer {
    calls: Arc<AtomicUsize>,
}

impl TestDaemonizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Daemonizer for TestDaemonizer {
    fn daemonize(&self) -> Result<(), DaemonizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Shutdown source that can be armed before or during a launcher run.
#[derive(Clone, Default)]
pub struct TestShutdownSignal {
    pretriggered: bool,
    delay: Option<Duration>,
    // Held so idle listeners never observe a hang-up.
    triggers: Arc<Mutex<Vec<ShutdownTrigger>>>,
}

impl TestShutdownSignal {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn pretriggered() -> Self {
        Self {
            pretriggered: true,
            ..Self::default()
        }
    }

    /// Requests shutdown `delay` after the listener is installed.
    pub fn after(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn install(&self) -> Result<ShutdownListener, ShutdownError> {
        let (listener, trigger) =
            ShutdownListener::channel().map_err(|source| ShutdownError::Install { source })?;
        if self.pretriggered {
            trigger
                .trigger()
                .map_err(|source| ShutdownError::Install { source })?;
        }
        if let Some(delay) = self.delay {
            thread::spawn(move || {
                thread::sleep(delay);
                // The run may already be over and the listener gone.
                let _ = trigger.trigger();
            });
            return Ok(listener);
        }
        self.triggers
            .lock()
            .expect("trigger mutex poisoned")
            .push(trigger);
        Ok(listener)
    }
}

/// Console that breaks, like a closed terminal, once the stop notice arrives.
#[derive(Default)]
pub struct ConsoleClosedOnStop {
    written: Vec<u8>,
}

impl ConsoleClosedOnStop {
    pub fn into_inner(self) -> Vec<u8> {
        self.written
    }
}

impl Write for ConsoleClosedOnStop {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if String::from_utf8_lossy(buf).contains("Stop requested") {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "console closed"));
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Peer signaller that records requests and releases a simulated peer's lock.
#[derive(Clone, Default)]
pub struct RecordingPeerSignaller {
    signalled: Arc<Mutex<Vec<u32>>>,
    peer: Arc<Mutex<Option<LockHandle>>>,
}

impl RecordingPeerSignaller {
    /// Keeps `handle` locked until the peer is asked to stop.
    pub fn hold(&self, handle: LockHandle) {
        *self.peer.lock().expect("peer mutex poisoned") = Some(handle);
    }

    pub fn signalled(&self) -> Vec<u32> {
        self.signalled
            .lock()
            .expect("signal mutex poisoned")
            .clone()
    }
}

impl PeerSignaller for RecordingPeerSignaller {
    fn request_stop(&self, pid: u32) -> Result<(), PeerSignalError> {
        self.signalled
            .lock()
            .expect("signal mutex poisoned")
            .push(pid);
        // The simulated peer exits by releasing its lock.
        drop(self.peer.lock().expect("peer mutex poisoned").take());
        Ok(())
    }
}

//! Sequences the launcher lifecycle: decide, install, launch, supervise.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::{ExitCode, ExitStatus};

use reh_config::Config;
use tracing::{error, info, warn};

use crate::archive::{ArchiveTool, UnzipTool};
use crate::artifact::{ArtifactError, ArtifactLocator, ArtifactRef, Platform};
use crate::version::{Version, is_newer};

use super::PROCESS_TARGET;
use super::child::{ChildHandle, LaunchCommand, ServiceWait, exit_code_for};
use super::daemonizer::{Daemonizer, SystemDaemonizer};
use super::errors::LaunchError;
use super::lock::{InstanceLock, InstanceRecord, LockAttempt, LockHandle, LockProbe};
use super::multiplexer::{Console, LogMultiplexer, MonitorOutcome};
use super::peer::{PeerSignaller, SystemPeerSignaller};
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Launch mode for the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    Background,
    /// Stay attached and echo service output to the console.
    Foreground,
}

/// Per-invocation choices taken from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Whether to detach.
    pub mode: LaunchMode,
    /// Report what would happen without acting on it.
    pub dry_run: bool,
    /// Directory searched for the packed archive.
    pub archive_dir: PathBuf,
}

/// How a launcher run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The dry-run report was printed.
    DryRun,
    /// A running instance already serves the newest version.
    UpToDate,
    /// Shutdown was requested and the service reaped.
    Stopped,
    /// The service exited on its own.
    ServiceExited(ExitStatus),
}

impl LaunchOutcome {
    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::ServiceExited(status) => ExitCode::from(exit_code_for(status)),
            Self::DryRun | Self::UpToDate | Self::Stopped => ExitCode::SUCCESS,
        }
    }
}

/// Supervisor lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing decided yet.
    Idle,
    /// Contending for the instance lock and comparing versions.
    Deciding,
    /// A running instance is current; nothing to do.
    Skip,
    /// Replacing the extracted artifact from the archive.
    Installing,
    /// Building the service invocation.
    Launching,
    /// Detaching from the terminal.
    Daemonizing,
    /// Supervising the service.
    Running,
    /// Waiting for the service to exit.
    Stopping,
    /// The service has been reaped.
    Stopped,
}

impl Phase {
    /// Stable lowercase name used in structured logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Deciding => "deciding",
            Self::Skip => "skip",
            Self::Installing => "installing",
            Self::Launching => "launching",
            Self::Daemonizing => "daemonizing",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the lifecycle may move from `self` to `next`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Deciding)
                | (
                    Self::Deciding,
                    Self::Skip | Self::Installing | Self::Launching
                )
                | (Self::Installing, Self::Launching)
                | (Self::Launching, Self::Daemonizing | Self::Running)
                | (Self::Daemonizing, Self::Running)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }
}

#[derive(Debug)]
struct Lifecycle {
    phase: Phase,
}

impl Lifecycle {
    const fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "invalid lifecycle transition {:?} -> {next:?}",
            self.phase
        );
        info!(
            target: PROCESS_TARGET,
            from = self.phase.as_str(),
            to = next.as_str(),
            "lifecycle transition"
        );
        self.phase = next;
    }
}

/// Process-level collaborators needed to control the supervisor.
pub(crate) struct ProcessControl<D, S, P> {
    pub(crate) daemonizer: D,
    pub(crate) shutdown: S,
    pub(crate) peers: P,
}

/// Everything a launcher run needs, with collaborators injected.
pub(crate) struct LaunchPlan<'a, A, D, S, P> {
    pub(crate) config: &'a Config,
    pub(crate) options: LaunchOptions,
    pub(crate) platform: Platform,
    pub(crate) archive: A,
    pub(crate) process: ProcessControl<D, S, P>,
}

/// Runs the launcher using the production collaborators.
pub fn run_launcher<W: Write, E: Write>(
    config: &Config,
    options: LaunchOptions,
    stdout: &mut W,
    stderr: &mut E,
) -> Result<LaunchOutcome, LaunchError> {
    let plan = LaunchPlan {
        config,
        options,
        platform: Platform::current(),
        archive: UnzipTool::new(),
        process: ProcessControl {
            daemonizer: SystemDaemonizer::new(),
            shutdown: SystemShutdownSignal::new(),
            peers: SystemPeerSignaller,
        },
    };
    run_launcher_with(plan, stdout, stderr)
}

/// Runs the launcher with injected collaborators.
pub(crate) fn run_launcher_with<A, D, S, P, W, E>(
    plan: LaunchPlan<'_, A, D, S, P>,
    stdout: &mut W,
    stderr: &mut E,
) -> Result<LaunchOutcome, LaunchError>
where
    A: ArchiveTool,
    D: Daemonizer,
    S: ShutdownSignal,
    P: PeerSignaller,
    W: Write,
    E: Write,
{
    let LaunchPlan {
        config,
        options,
        platform,
        archive,
        process,
    } = plan;
    let mut lifecycle = Lifecycle::new();
    info!(
        target: PROCESS_TARGET,
        mode = ?options.mode,
        dry_run = options.dry_run,
        "starting launcher"
    );

    lifecycle.advance(Phase::Deciding);
    let extract_dir = config.extract_dir().as_std_path();
    let artifact = ArtifactLocator::new(platform).locate(&options.archive_dir, extract_dir)?;
    let lock = InstanceLock::new(config.pidfile().as_std_path());

    if options.dry_run {
        let running = probe_running(&lock)?;
        let versions = Versions::read(&artifact, &archive)?;
        report_status(stdout, running.as_ref(), versions)?;
        let command = LaunchCommand::from_config(config, &artifact);
        writeln!(stdout, "{}", command.display_line())?;
        return Ok(LaunchOutcome::DryRun);
    }

    let contention = contend(&lock)?;
    let versions = Versions::read(&artifact, &archive)?;
    report_status(stdout, contention.running(), versions)?;
    let handle = match contention {
        Contention::Acquired(handle) => handle,
        Contention::Running(record) => {
            if !is_newer(record.version, versions.candidate) {
                lifecycle.advance(Phase::Skip);
                info!(
                    target: PROCESS_TARGET,
                    pid = record.pid,
                    "running instance is up to date"
                );
                return Ok(LaunchOutcome::UpToDate);
            }
            writeln!(
                stdout,
                "Provided archive has a newer version. Stopping existing instance ..."
            )?;
            stdout.flush()?;
            process.peers.request_stop(record.pid)?;
            lock.acquire_blocking()?
        }
    };

    // The peer may have installed a different version while we waited.
    let installed = artifact.installed_version()?;
    if is_newer(installed, versions.candidate) {
        lifecycle.advance(Phase::Installing);
        writeln!(
            stdout,
            "Provided archive has a newer version. Replacing existing installation ..."
        )?;
        artifact.install(&archive, extract_dir)?;
    }

    lifecycle.advance(Phase::Launching);
    let command = LaunchCommand::from_config(config, &artifact);
    if options.mode == LaunchMode::Background {
        lifecycle.advance(Phase::Daemonizing);
        stdout.flush()?;
        stderr.flush()?;
        process.daemonizer.daemonize()?;
    }

    lifecycle.advance(Phase::Running);
    let session = Session {
        config,
        artifact: &artifact,
        command: &command,
        mode: options.mode,
    };
    session.supervise(handle, &process.shutdown, &mut lifecycle, stdout, stderr)
}

#[derive(Debug, Clone, Copy)]
struct Versions {
    candidate: Option<Version>,
    installed: Option<Version>,
}

impl Versions {
    fn read(artifact: &ArtifactRef, archive: &dyn ArchiveTool) -> Result<Self, ArtifactError> {
        Ok(Self {
            candidate: artifact.candidate_version(archive)?,
            installed: artifact.installed_version()?,
        })
    }
}

enum Contention {
    Acquired(LockHandle),
    Running(InstanceRecord),
}

impl Contention {
    fn running(&self) -> Option<&InstanceRecord> {
        match self {
            Self::Acquired(_) => None,
            Self::Running(record) => Some(record),
        }
    }
}

fn contend(lock: &InstanceLock) -> Result<Contention, LaunchError> {
    match lock.try_acquire()? {
        LockAttempt::Acquired(handle) => Ok(Contention::Acquired(handle)),
        LockAttempt::Busy => Ok(Contention::Running(lock.read_peer_record()?)),
    }
}

fn probe_running(lock: &InstanceLock) -> Result<Option<InstanceRecord>, LaunchError> {
    match lock.probe()? {
        LockProbe::Vacant => Ok(None),
        LockProbe::Busy => Ok(Some(lock.read_peer_record()?)),
    }
}

fn report_status<W: Write>(
    out: &mut W,
    running: Option<&InstanceRecord>,
    versions: Versions,
) -> Result<(), LaunchError> {
    if let Some(record) = running {
        writeln!(out, "Existing instance already running.")?;
        writeln!(out, "  PID    : {}", record.pid)?;
        match record.version {
            Some(version) => writeln!(out, "  version: {version}")?,
            None => writeln!(out, "  version: unknown")?,
        }
    }
    if let Some(version) = versions.candidate {
        writeln!(out, "Provided zip file version: {version}")?;
    }
    if let Some(version) = versions.installed {
        writeln!(out, "Existing REH version: {version}")?;
    }
    Ok(())
}

struct Session<'a> {
    config: &'a Config,
    artifact: &'a ArtifactRef,
    command: &'a LaunchCommand,
    mode: LaunchMode,
}

impl Session<'_> {
    fn supervise<S, W, E>(
        &self,
        mut lock: LockHandle,
        shutdown: &S,
        lifecycle: &mut Lifecycle,
        stdout: &mut W,
        stderr: &mut E,
    ) -> Result<LaunchOutcome, LaunchError>
    where
        S: ShutdownSignal,
        W: Write,
        E: Write,
    {
        let pid = std::process::id();
        let log_path = self.config.log_path(pid).into_std_path_buf();
        if self.mode == LaunchMode::Foreground {
            writeln!(stdout, "Launcher's PID: {pid}")?;
            writeln!(stdout, "Log file: {}", log_path.display())?;
        }
        let log = File::create(&log_path).map_err(|source| LaunchError::LogOpen {
            path: log_path.clone(),
            source,
        })?;
        let listener = shutdown.install()?;
        lock.write_record(&InstanceRecord {
            pid,
            version: self.artifact.installed_version()?,
        })?;

        let (mut child, streams) = match self.command.spawn() {
            Ok(spawned) => spawned,
            Err(spawn_error) => {
                lock.clear_record()?;
                return Err(spawn_error.into());
            }
        };
        let console = match self.mode {
            LaunchMode::Foreground => Some(Console::new(&mut *stdout, &mut *stderr)),
            LaunchMode::Background => None,
        };
        let monitored = LogMultiplexer::new(log, console).run(streams, &listener);

        let outcome = match monitored {
            Ok(MonitorOutcome::Cancelled) => self.stop(child, lifecycle, stdout)?,
            Ok(MonitorOutcome::StreamsClosed) => {
                info!(target: PROCESS_TARGET, "service closed its output streams");
                match child.wait_or_cancel(&listener) {
                    Ok(ServiceWait::Exited(status)) => {
                        lifecycle.advance(Phase::Stopping);
                        LaunchOutcome::ServiceExited(status)
                    }
                    Ok(ServiceWait::Cancelled) => self.stop(child, lifecycle, stdout)?,
                    Err(wait_error) => {
                        child.interrupt_group();
                        child.reap()?;
                        return Err(wait_error.into());
                    }
                }
            }
            Err(monitor_error) => {
                error!(
                    target: PROCESS_TARGET,
                    error = %monitor_error,
                    "service monitoring failed; stopping service"
                );
                child.interrupt_group();
                child.reap()?;
                return Err(monitor_error.into());
            }
        };
        lifecycle.advance(Phase::Stopped);
        drop(lock);
        Ok(outcome)
    }

    /// Interrupts the service group and reaps it after a shutdown request.
    ///
    /// Nothing between the request and the reap may abort the stop, so the
    /// console notice is best effort.
    fn stop<W: Write>(
        &self,
        child: ChildHandle,
        lifecycle: &mut Lifecycle,
        stdout: &mut W,
    ) -> Result<LaunchOutcome, LaunchError> {
        info!(target: PROCESS_TARGET, "stop requested");
        lifecycle.advance(Phase::Stopping);
        child.interrupt_group();
        if self.mode == LaunchMode::Foreground {
            if let Err(error) = writeln!(stdout, "Stop requested.").and_then(|()| stdout.flush()) {
                warn!(
                    target: PROCESS_TARGET,
                    error = %error,
                    "failed to report stop request on the console"
                );
            }
        }
        child.reap()?;
        Ok(LaunchOutcome::Stopped)
    }
}

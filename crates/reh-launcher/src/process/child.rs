//! Builds the service command line and owns the spawned service process.

use std::fs::File;
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use nix::errno::Errno;
use nix::poll::PollTimeout;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use reh_config::Config;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::PROCESS_TARGET;
use super::multiplexer::OutputStreams;
use super::shutdown::ShutdownListener;
use crate::artifact::ArtifactRef;

/// Errors raised while starting or reaping the managed service.
#[derive(Debug, Error)]
pub enum ChildError {
    /// The service binary could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The service started without the piped output it was given.
    #[error("service output stream {0} was not captured")]
    MissingStream(&'static str),
    /// Waiting for the service to exit failed.
    #[error("failed to wait for service pid {pid}: {source}")]
    Wait {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

/// How long one exit check waits on the shutdown listener, in milliseconds.
const EXIT_POLL_INTERVAL_MS: u16 = 100;

/// What ended a wait on the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceWait {
    /// The service exited and has been reaped.
    Exited(ExitStatus),
    /// Shutdown was requested first; the service is still running.
    Cancelled,
}

/// Program and arguments used to start the managed service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl LaunchCommand {
    /// Assembles the service invocation for `artifact` from configuration.
    ///
    /// Arguments appear in a fixed order: bind address, port, data and
    /// extension directories, the authentication choice, then any extra
    /// arguments verbatim. An empty token counts as no token.
    #[must_use]
    pub fn from_config(config: &Config, artifact: &ArtifactRef) -> Self {
        let mut args = vec![
            "--host".to_owned(),
            config.host.clone(),
            "--port".to_owned(),
            config.port.to_string(),
            "--server-data-dir".to_owned(),
            config.data_dir.to_string(),
            "--extensions-dir".to_owned(),
            config.ext_dir.to_string(),
        ];
        match config.token.as_deref().filter(|token| !token.is_empty()) {
            Some(token) => {
                args.push("--connection-token".to_owned());
                args.push(token.to_owned());
            }
            None => args.push("--without-connection-token".to_owned()),
        }
        args.extend(config.extra_args.iter().cloned());
        Self {
            program: artifact.service_binary(),
            args,
        }
    }

    /// Executable path.
    #[must_use]
    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Arguments following the executable.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Single-line rendering of the full argument vector.
    #[must_use]
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Starts the service in its own process group with piped output.
    ///
    /// Standard input is detached so a foreground service never competes
    /// with the terminal.
    pub fn spawn(&self) -> Result<(ChildHandle, OutputStreams), ChildError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|source| ChildError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let streams = take_streams(&mut child);
        let handle = ChildHandle { child };
        info!(
            target: PROCESS_TARGET,
            pid = handle.pid(),
            program = %self.program.display(),
            "service started"
        );
        match streams {
            Ok(streams) => Ok((handle, streams)),
            Err(error) => {
                handle.interrupt_group();
                handle.reap()?;
                Err(error)
            }
        }
    }
}

fn take_streams(child: &mut Child) -> Result<OutputStreams, ChildError> {
    let stdout = child
        .stdout
        .take()
        .ok_or(ChildError::MissingStream("stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or(ChildError::MissingStream("stderr"))?;
    Ok(OutputStreams::new(
        File::from(OwnedFd::from(stdout)),
        File::from(OwnedFd::from(stderr)),
    ))
}

/// Owned handle to the running service.
///
/// The handle is consumed by [`ChildHandle::reap`], so the service is always
/// waited for before the handle goes away on the supervised paths.
#[derive(Debug)]
pub struct ChildHandle {
    child: Child,
}

impl ChildHandle {
    /// PID of the service, which also identifies its process group.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Sends `SIGINT` to the service's process group.
    ///
    /// Failures are logged; the caller still reaps the service afterwards.
    pub fn interrupt_group(&self) {
        let Ok(raw) = i32::try_from(self.pid()) else {
            warn!(
                target: PROCESS_TARGET,
                pid = self.pid(),
                "service pid out of range; cannot signal its group"
            );
            return;
        };
        match killpg(Pid::from_raw(raw), Signal::SIGINT) {
            Ok(()) => info!(
                target: PROCESS_TARGET,
                pgid = raw,
                "interrupt sent to service process group"
            ),
            Err(Errno::ESRCH) => debug!(
                target: PROCESS_TARGET,
                pgid = raw,
                "service process group already gone"
            ),
            Err(error) => warn!(
                target: PROCESS_TARGET,
                pgid = raw,
                error = %error,
                "failed to interrupt service process group"
            ),
        }
    }

    /// Waits for the service to exit unless shutdown is requested first.
    ///
    /// Used once the service has closed its output, when the multiplexer no
    /// longer has anything to watch besides the listener.
    pub fn wait_or_cancel(
        &mut self,
        listener: &ShutdownListener,
    ) -> Result<ServiceWait, ChildError> {
        let pid = self.pid();
        loop {
            if let Some(status) = self
                .child
                .try_wait()
                .map_err(|source| ChildError::Wait { pid, source })?
            {
                info!(
                    target: PROCESS_TARGET,
                    pid,
                    status = %status,
                    "service reaped"
                );
                return Ok(ServiceWait::Exited(status));
            }
            if listener
                .wait_for(PollTimeout::from(EXIT_POLL_INTERVAL_MS))
                .map_err(|source| ChildError::Wait { pid, source })?
            {
                return Ok(ServiceWait::Cancelled);
            }
        }
    }

    /// Waits for the service to exit and returns its status.
    pub fn reap(mut self) -> Result<ExitStatus, ChildError> {
        let pid = self.pid();
        let status = self
            .child
            .wait()
            .map_err(|source| ChildError::Wait { pid, source })?;
        info!(
            target: PROCESS_TARGET,
            pid,
            status = %status,
            "service reaped"
        );
        Ok(status)
    }
}

/// Maps a service exit status onto the launcher's own exit code.
///
/// Normal exits propagate their code; signal deaths follow the shell
/// convention of `128 + signal`.
#[must_use]
pub fn exit_code_for(status: ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        return u8::try_from(code).unwrap_or(1);
    }
    status
        .signal()
        .and_then(|signal| u8::try_from(128 + signal).ok())
        .unwrap_or(1)
}

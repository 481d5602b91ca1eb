//! Launcher and supervisor for a single remote extension host (REH).
//!
//! One invocation decides whether a service instance needs to start,
//! upgrade or do nothing, based on an exclusive lock file and the versions of
//! the running, installed and packed artifacts. When it launches, it
//! optionally daemonises, starts the service in its own process group and
//! relays the service's output into a per-supervisor log file until the
//! service exits or a termination signal asks it to stop.
//!
//! Configuration is loaded through [`reh_config`]; everything else lives in
//! this crate.

use std::env;
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use reh_config::Config;

pub mod archive;
pub mod artifact;
mod cli;
mod errors;
mod process;
mod telemetry;
pub mod version;

pub use artifact::Platform;
pub use process::{
    ChildError, Console, DaemonizeError, Daemonizer, InstanceLock, InstanceRecord, LaunchCommand,
    LaunchError, LaunchMode, LaunchOptions, LaunchOutcome, LockAttempt, LockError, LockHandle,
    LockProbe, LockRecordError, LogMultiplexer, MonitorError, MonitorOutcome, OutputStreams,
    PeerSignalError, PeerSignaller, Phase, RelayError, ShutdownError, ShutdownListener,
    ShutdownSignal, ShutdownTrigger, StreamKind, SystemDaemonizer, SystemPeerSignaller,
    SystemShutdownSignal, exit_code_for, run_launcher,
};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use version::{Version, VersionFormatError, is_newer};

use cli::Cli;
use errors::AppError;

/// Runs the launcher using the provided arguments and IO handles.
///
/// Usage errors exit 1; `--help` and `--version` exit 0.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) if error.use_stderr() => {
            let _ = write!(stderr, "{}", error.render());
            return ExitCode::FAILURE;
        }
        Err(error) => {
            let _ = write!(stdout, "{}", error.render());
            return ExitCode::SUCCESS;
        }
    };
    match execute(&cli, stdout, stderr) {
        Ok(exit_code) => exit_code,
        Err(error) => {
            let _ = writeln!(stderr, "{error}");
            ExitCode::FAILURE
        }
    }
}

fn execute<W: Write, E: Write>(
    cli: &Cli,
    stdout: &mut W,
    stderr: &mut E,
) -> Result<ExitCode, AppError> {
    if let Some(workdir) = &cli.workdir {
        env::set_current_dir(workdir).map_err(|source| AppError::Workdir {
            path: workdir.clone(),
            source,
        })?;
    }
    let config = Config::load_and_prepare(&cli.config)?;
    telemetry::initialise(&config)?;
    let options = LaunchOptions {
        mode: if cli.foreground {
            LaunchMode::Foreground
        } else {
            LaunchMode::Background
        },
        dry_run: cli.dry_run,
        archive_dir: PathBuf::from("."),
    };
    let outcome = run_launcher(&config, options, stdout, stderr)?;
    Ok(outcome.exit_code())
}

#[cfg(test)]
mod tests;

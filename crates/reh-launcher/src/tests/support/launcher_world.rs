//! Launcher test world shared across unit tests and BDD scenarios.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use reh_config::Config;
use tempfile::TempDir;

use crate::artifact::Platform;
use crate::process::launch::{
    LaunchMode, LaunchOptions, LaunchOutcome, LaunchPlan, ProcessControl, run_launcher_with,
};
use crate::process::lock::{InstanceLock, InstanceRecord, LockAttempt};
use crate::process::LaunchError;

use super::collaborators::{
    ConsoleClosedOnStop, FakeArchiveTool, RecordingPeerSignaller, TestDaemonizer,
    TestShutdownSignal, write_service,
};

pub const ARTIFACT_NAME: &str = "vscode-reh-linux-x64";
/// PID recorded by the simulated peer; it is never signalled for real.
pub const PEER_PID: u32 = 4_194_301;

pub const CHATTY_SERVICE: &str = "echo \"service ready: $*\"\necho \"service warning\" >&2";
pub const LONG_RUNNING_SERVICE: &str =
    "echo $$ > \"$0.pid\"\necho \"service started\"\nexec sleep 30";
/// Keeps running after closing both output streams.
pub const SILENT_SERVICE: &str = "echo $$ > \"$0.pid\"\nexec >/dev/null 2>&1\nexec sleep 30";

pub type StepResult = Result<(), String>;

pub struct LauncherWorld {
    root: TempDir,
    config: Config,
    platform: Platform,
    archive: FakeArchiveTool,
    daemonizer: TestDaemonizer,
    shutdown: TestShutdownSignal,
    peers: RecordingPeerSignaller,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    result: Option<Result<LaunchOutcome, LaunchError>>,
    elapsed: Option<Duration>,
}

impl Default for LauncherWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl LauncherWorld {
    pub fn new() -> Self {
        let root = TempDir::new().expect("failed to create launcher working directory");
        let base = Utf8PathBuf::from_path_buf(root.path().to_path_buf())
            .expect("temporary directory was not valid UTF-8");
        let config = Config {
            data_dir: base.join("server-data/data"),
            ext_dir: base.join("server-data/extensions"),
            extract_dir: base.clone(),
            pidfile: base.join("run.pid"),
            logfile: base.join("server-data/reh-%pid.log"),
            ..Config::default()
        };
        config
            .prepare_filesystem()
            .expect("failed to prepare launcher directories");
        Self {
            root,
            config,
            platform: Platform::new("linux", "x86_64"),
            archive: FakeArchiveTool::new(CHATTY_SERVICE),
            daemonizer: TestDaemonizer::default(),
            shutdown: TestShutdownSignal::idle(),
            peers: RecordingPeerSignaller::default(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            result: None,
            elapsed: None,
        }
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn set_platform(&mut self, platform: Platform) {
        self.platform = platform;
    }

    pub fn request_shutdown_in_advance(&mut self) {
        self.shutdown = TestShutdownSignal::pretriggered();
    }

    pub fn request_shutdown_after(&mut self, delay: Duration) {
        self.shutdown = TestShutdownSignal::after(delay);
    }

    pub fn root(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    pub fn pidfile(&self) -> PathBuf {
        self.config.pidfile.clone().into_std_path_buf()
    }

    pub fn write_archive(&self, version: &str) -> StepResult {
        let path = self.root.path().join(format!("{ARTIFACT_NAME}.zip"));
        fs::write(path, version).map_err(|error| error.to_string())
    }

    pub fn write_installed(&self, version: &str, script: &str) -> StepResult {
        write_service(&self.root.path().join(ARTIFACT_NAME), version, script)
            .map_err(|error| error.to_string())
    }

    /// Simulates a peer supervisor holding the lock with a written record.
    pub fn start_running_instance(&self, version: &str) -> StepResult {
        let lock = InstanceLock::new(self.pidfile());
        let mut handle = match lock.try_acquire().map_err(|error| error.to_string())? {
            LockAttempt::Acquired(handle) => handle,
            LockAttempt::Busy => return Err("lock already held".to_owned()),
        };
        let record = InstanceRecord {
            pid: PEER_PID,
            version: Some(version.parse().map_err(|error| format!("{error}"))?),
        };
        handle
            .write_record(&record)
            .map_err(|error| error.to_string())?;
        self.peers.hold(handle);
        Ok(())
    }

    pub fn run(&mut self, mode: LaunchMode) {
        self.launch(mode, false);
    }

    pub fn run_dry(&mut self) {
        self.launch(LaunchMode::Foreground, true);
    }

    /// Runs in the foreground with a console that fails on the stop notice.
    pub fn run_with_console_closed_on_stop(&mut self) {
        let mut console = ConsoleClosedOnStop::default();
        self.launch_into(LaunchMode::Foreground, false, &mut console);
        self.stdout = console.into_inner();
    }

    fn launch(&mut self, mode: LaunchMode, dry_run: bool) {
        let mut stdout = std::mem::take(&mut self.stdout);
        self.launch_into(mode, dry_run, &mut stdout);
        self.stdout = stdout;
    }

    fn launch_into<W: Write>(&mut self, mode: LaunchMode, dry_run: bool, stdout: &mut W) {
        let plan = LaunchPlan {
            config: &self.config,
            options: LaunchOptions {
                mode,
                dry_run,
                archive_dir: self.root.path().to_path_buf(),
            },
            platform: self.platform,
            archive: self.archive.clone(),
            process: ProcessControl {
                daemonizer: self.daemonizer.clone(),
                shutdown: self.shutdown.clone(),
                peers: self.peers.clone(),
            },
        };
        let started = Instant::now();
        self.result = Some(run_launcher_with(plan, stdout, &mut self.stderr));
        self.elapsed = Some(started.elapsed());
    }

    /// Wall-clock time the last launcher run took.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// PID the installed service script recorded for itself, if it got that far.
    pub fn service_pid(&self) -> Option<i32> {
        let path = self
            .root
            .path()
            .join(ARTIFACT_NAME)
            .join("bin/code-server-oss.pid");
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    pub fn outcome(&self) -> Result<LaunchOutcome, String> {
        match self.result.as_ref() {
            Some(Ok(outcome)) => Ok(*outcome),
            Some(Err(error)) => Err(format!("launcher failed: {error}")),
            None => Err("launcher has not run".to_owned()),
        }
    }

    pub fn error(&self) -> Option<&LaunchError> {
        self.result.as_ref()?.as_ref().err()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn installed_version(&self) -> Option<String> {
        let manifest = self.root.path().join(ARTIFACT_NAME).join("package.json");
        let contents = fs::read_to_string(manifest).ok()?;
        let value: serde_json::Value = serde_json::from_str(&contents).ok()?;
        value.get("version")?.as_str().map(str::to_owned)
    }

    pub fn record(&self) -> Option<InstanceRecord> {
        let contents = fs::read_to_string(self.pidfile()).ok()?;
        if contents.trim().is_empty() {
            return None;
        }
        serde_json::from_str(&contents).ok()
    }

    pub fn log_text(&self) -> String {
        fs::read_to_string(self.config.log_path(process::id())).unwrap_or_default()
    }

    pub fn extractions(&self) -> usize {
        self.archive.extractions()
    }

    pub fn daemonizations(&self) -> usize {
        self.daemonizer.calls()
    }

    pub fn signalled(&self) -> Vec<u32> {
        self.peers.signalled()
    }
}

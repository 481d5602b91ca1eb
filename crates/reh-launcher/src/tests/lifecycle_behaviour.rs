//! Behavioural tests covering the launcher's decide/launch/supervise cycle.

use std::cell::RefCell;
use std::process;
use std::time::Duration;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::process::launch::{LaunchMode, LaunchOutcome};

use super::support::{
    CHATTY_SERVICE, LONG_RUNNING_SERVICE, LauncherWorld, PEER_PID, SILENT_SERVICE, StepResult,
};

#[fixture]
fn world() -> RefCell<LauncherWorld> {
    RefCell::new(LauncherWorld::new())
}

#[given("a packed artifact of version {version}")]
fn given_packed_artifact(world: &RefCell<LauncherWorld>, version: String) -> StepResult {
    world.borrow().write_archive(&version)
}

#[given("an installed artifact of version {version}")]
fn given_installed_artifact(world: &RefCell<LauncherWorld>, version: String) -> StepResult {
    world.borrow().write_installed(&version, CHATTY_SERVICE)
}

#[given("an installed long-running service of version {version}")]
fn given_long_running_service(world: &RefCell<LauncherWorld>, version: String) -> StepResult {
    world.borrow().write_installed(&version, LONG_RUNNING_SERVICE)
}

#[given("an installed silent long-running service of version {version}")]
fn given_silent_service(world: &RefCell<LauncherWorld>, version: String) -> StepResult {
    world.borrow().write_installed(&version, SILENT_SERVICE)
}

#[given("a running instance of version {version}")]
fn given_running_instance(world: &RefCell<LauncherWorld>, version: String) -> StepResult {
    world.borrow().start_running_instance(&version)
}

#[given("a pending shutdown request")]
fn given_pending_shutdown(world: &RefCell<LauncherWorld>) {
    world.borrow_mut().request_shutdown_in_advance();
}

#[given("a shutdown request arriving after {millis} milliseconds")]
fn given_delayed_shutdown(world: &RefCell<LauncherWorld>, millis: u64) {
    world
        .borrow_mut()
        .request_shutdown_after(Duration::from_millis(millis));
}

#[when("the launcher runs in the foreground")]
fn when_runs_foreground(world: &RefCell<LauncherWorld>) {
    world.borrow_mut().run(LaunchMode::Foreground);
}

#[when("the launcher runs in the background")]
fn when_runs_background(world: &RefCell<LauncherWorld>) {
    world.borrow_mut().run(LaunchMode::Background);
}

#[then("the service ran to completion")]
fn then_service_completed(world: &RefCell<LauncherWorld>) -> StepResult {
    match world.borrow().outcome()? {
        LaunchOutcome::ServiceExited(status) if status.success() => Ok(()),
        other => Err(format!("expected a clean service exit, got {other:?}")),
    }
}

#[then("the launcher stopped the service")]
fn then_service_stopped(world: &RefCell<LauncherWorld>) -> StepResult {
    match world.borrow().outcome()? {
        LaunchOutcome::Stopped => Ok(()),
        other => Err(format!("expected a requested stop, got {other:?}")),
    }
}

#[then("the launcher left the running instance alone")]
fn then_left_alone(world: &RefCell<LauncherWorld>) -> StepResult {
    let world = world.borrow();
    if world.outcome()? != LaunchOutcome::UpToDate {
        return Err("launcher should have skipped".to_owned());
    }
    assert!(world.signalled().is_empty(), "no peer should be signalled");
    assert_eq!(world.daemonizations(), 0, "launcher should not detach");
    let record = world.record().expect("peer record should remain");
    assert_eq!(record.pid, PEER_PID);
    Ok(())
}

#[then("nothing was extracted")]
fn then_nothing_extracted(world: &RefCell<LauncherWorld>) {
    assert_eq!(world.borrow().extractions(), 0);
}

#[then("the report names the running instance at version {version}")]
fn then_report_names_instance(world: &RefCell<LauncherWorld>, version: String) {
    let stdout = world.borrow().stdout_text();
    assert!(stdout.contains("Existing instance already running."));
    assert!(stdout.contains(&format!("  PID    : {PEER_PID}")));
    assert!(stdout.contains(&format!("  version: {version}")), "stdout: {stdout}");
}

#[then("the launcher returned within {seconds} seconds")]
fn then_returned_within(world: &RefCell<LauncherWorld>, seconds: u64) -> StepResult {
    let elapsed = world
        .borrow()
        .elapsed()
        .ok_or_else(|| "launcher has not run".to_owned())?;
    if elapsed < Duration::from_secs(seconds) {
        Ok(())
    } else {
        Err(format!("launcher took {elapsed:?}"))
    }
}

#[then("the running instance was asked to stop")]
fn then_peer_signalled(world: &RefCell<LauncherWorld>) {
    assert_eq!(world.borrow().signalled(), vec![PEER_PID]);
}

#[then("the launcher daemonised once")]
fn then_daemonised_once(world: &RefCell<LauncherWorld>) {
    assert_eq!(world.borrow().daemonizations(), 1);
}

#[then("the artifact of version {version} is installed")]
fn then_artifact_installed(world: &RefCell<LauncherWorld>, version: String) {
    assert_eq!(world.borrow().installed_version(), Some(version));
}

#[then("the instance record names this launcher with version {version}")]
fn then_record_names_launcher(world: &RefCell<LauncherWorld>, version: String) {
    let record = world
        .borrow()
        .record()
        .expect("instance record should be written");
    assert_eq!(record.pid, process::id());
    assert_eq!(record.version.map(|found| found.to_string()), Some(version));
}

#[then("the log file captured both service streams")]
fn then_log_captured(world: &RefCell<LauncherWorld>) {
    let log = world.borrow().log_text();
    assert!(log.contains("service ready: --host 127.0.0.1 --port 3250"), "log: {log}");
    assert!(log.contains("--without-connection-token"), "log: {log}");
    assert!(log.contains("service warning"), "log: {log}");
}

#[then("the console echoed the service output")]
fn then_console_echoed(world: &RefCell<LauncherWorld>) {
    let world = world.borrow();
    let stdout = world.stdout_text();
    assert!(stdout.contains("Launcher's PID: "), "stdout: {stdout}");
    assert!(stdout.contains("Log file: "), "stdout: {stdout}");
    assert!(stdout.contains("service ready"), "stdout: {stdout}");
    assert!(world.stderr_text().contains("service warning"));
}

#[then("the console stayed quiet")]
fn then_console_quiet(world: &RefCell<LauncherWorld>) {
    let world = world.borrow();
    assert!(!world.stdout_text().contains("service ready"));
    assert!(!world.stderr_text().contains("service warning"));
    assert!(world.log_text().contains("service ready"));
}

#[scenario(path = "tests/features/fresh_start.feature")]
fn fresh_start(#[from(world)] _: RefCell<LauncherWorld>) -> Result<(), String> {
    Ok(())
}

#[scenario(path = "tests/features/up_to_date.feature")]
fn up_to_date(#[from(world)] _: RefCell<LauncherWorld>) -> Result<(), String> {
    Ok(())
}

#[scenario(path = "tests/features/upgrade.feature")]
fn upgrade(#[from(world)] _: RefCell<LauncherWorld>) -> Result<(), String> {
    Ok(())
}

#[scenario(path = "tests/features/graceful_shutdown.feature")]
fn graceful_shutdown(#[from(world)] _: RefCell<LauncherWorld>) -> Result<(), String> {
    Ok(())
}

#[scenario(path = "tests/features/older_archive.feature")]
fn older_archive(#[from(world)] _: RefCell<LauncherWorld>) -> Result<(), String> {
    Ok(())
}

#[scenario(path = "tests/features/silent_service_shutdown.feature")]
fn silent_service_shutdown(#[from(world)] _: RefCell<LauncherWorld>) -> Result<(), String> {
    Ok(())
}

//! Shared fixtures for the launcher test suites.

mod collaborators;
mod launcher_world;

pub use collaborators::{
    FakeArchiveTool, RecordingPeerSignaller, TestDaemonizer, TestShutdownSignal, write_service,
};
pub use launcher_world::{
    ARTIFACT_NAME, CHATTY_SERVICE, LONG_RUNNING_SERVICE, LauncherWorld, PEER_PID, SILENT_SERVICE,
    StepResult,
};

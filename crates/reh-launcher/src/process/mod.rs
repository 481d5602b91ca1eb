//! Single-instance supervision of the managed service.

pub(crate) mod child;
pub(crate) mod daemonizer;
mod errors;
pub(crate) mod launch;
pub(crate) mod lock;
pub(crate) mod multiplexer;
pub(crate) mod peer;
pub(crate) mod shutdown;

pub use child::{ChildError, ChildHandle, LaunchCommand, ServiceWait, exit_code_for};
pub use daemonizer::{DaemonizeError, Daemonizer, SystemDaemonizer};
pub use errors::LaunchError;
pub use launch::{LaunchMode, LaunchOptions, LaunchOutcome, Phase, run_launcher};
pub use lock::{
    InstanceLock, InstanceRecord, LockAttempt, LockError, LockHandle, LockProbe, LockRecordError,
};
pub use multiplexer::{
    Console, LogMultiplexer, MonitorError, MonitorOutcome, OutputStreams, RelayError, StreamKind,
};
pub use peer::{PeerSignalError, PeerSignaller, SystemPeerSignaller};
pub use shutdown::{
    ShutdownError, ShutdownListener, ShutdownSignal, ShutdownTrigger, SystemShutdownSignal,
};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

//! Access to packed artifact archives.
//!
//! The launcher never unpacks archives itself. It delegates to an
//! [`ArchiveTool`], whose production implementation shells out to the system
//! `unzip` binary, so tests can substitute an in-memory double.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use thiserror::Error;
use tracing::debug;

const ARCHIVE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::archive");
const UNZIP_BINARY: &str = "unzip";

/// Errors raised while reading or extracting an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive tool could not be started.
    #[error("failed to run '{tool}' on '{archive}': {source}")]
    Spawn {
        tool: String,
        archive: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The archive tool ran but reported failure.
    #[error("'{tool}' failed on '{archive}' (status: {status:?}): {stderr}")]
    Failed {
        tool: String,
        archive: PathBuf,
        status: Option<i32>,
        stderr: String,
    },
}

/// Capability to inspect and unpack artifact archives.
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveTool {
    /// Returns the bytes of a single archive member without extracting it.
    fn read_member(&self, archive: &Path, member: &str) -> Result<Vec<u8>, ArchiveError>;

    /// Unpacks the whole archive into `destination`.
    fn extract(&self, archive: &Path, destination: &Path) -> Result<(), ArchiveError>;
}

/// Archive tool backed by the system `unzip` binary.
#[derive(Debug, Clone)]
pub struct UnzipTool {
    binary: OsString,
}

impl Default for UnzipTool {
    fn default() -> Self {
        Self::new()
    }
}

impl UnzipTool {
    /// Uses `unzip` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: OsString::from(UNZIP_BINARY),
        }
    }

    /// Uses an explicit binary, primarily for tests.
    #[must_use]
    pub fn with_binary(binary: impl Into<OsString>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, archive: &Path, command: &mut Command) -> Result<Output, ArchiveError> {
        let output = command
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ArchiveError::Spawn {
                tool: self.tool_name(),
                archive: archive.to_path_buf(),
                source,
            })?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(ArchiveError::Failed {
                tool: self.tool_name(),
                archive: archive.to_path_buf(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }

    fn tool_name(&self) -> String {
        self.binary.to_string_lossy().into_owned()
    }
}

impl ArchiveTool for UnzipTool {
    fn read_member(&self, archive: &Path, member: &str) -> Result<Vec<u8>, ArchiveError> {
        debug!(
            target: ARCHIVE_TARGET,
            archive = %archive.display(),
            member,
            "reading archive member"
        );
        let mut command = Command::new(&self.binary);
        command.arg("-p").arg(archive).arg(member);
        self.run(archive, &mut command).map(|output| output.stdout)
    }

    fn extract(&self, archive: &Path, destination: &Path) -> Result<(), ArchiveError> {
        debug!(
            target: ARCHIVE_TARGET,
            archive = %archive.display(),
            destination = %destination.display(),
            "extracting archive"
        );
        let mut command = Command::new(&self.binary);
        command
            .arg("-q")
            .arg(archive)
            .arg("-d")
            .arg(destination)
            .stdout(Stdio::null());
        self.run(archive, &mut command).map(|_| ())
    }
}

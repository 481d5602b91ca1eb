//! Filesystem preparation and runtime path derivation.
//!
//! Every directory-bearing option has its parent created before the launcher
//! starts work, so later stages can open the lock, log, and data paths
//! without racing directory creation.

use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::Config;
use crate::defaults::PID_PLACEHOLDER;

/// Raised when a configured directory cannot be created.
#[derive(Debug, Error)]
#[error("failed to create directory '{path}': {source}")]
pub struct DirectoryPreparationError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
}

impl Config {
    /// Creates the parent directory of each path-bearing option.
    pub fn prepare_filesystem(&self) -> Result<(), DirectoryPreparationError> {
        let paths = [
            &self.data_dir,
            &self.ext_dir,
            &self.extract_dir,
            &self.pidfile,
            &self.logfile,
        ];
        for parent in paths.into_iter().filter_map(|path| non_empty_parent(path)) {
            fs::create_dir_all(parent).map_err(|source| DirectoryPreparationError {
                path: parent.as_std_path().to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    /// Log file path with `%pid` replaced by `pid`.
    #[must_use]
    pub fn log_path(&self, pid: u32) -> Utf8PathBuf {
        Utf8PathBuf::from(self.logfile.as_str().replace(PID_PLACEHOLDER, &pid.to_string()))
    }
}

fn non_empty_parent(path: &Utf8Path) -> Option<&Utf8Path> {
    path.parent().filter(|parent| !parent.as_str().is_empty())
}

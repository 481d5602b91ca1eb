//! Discovery of the platform-specific service artifact.
//!
//! An artifact is named `vscode-reh-<suffix>` and may exist as an extracted
//! directory, a packed `.zip` archive, or both. Exactly one acceptable name
//! must be present for the host platform; that name is then fixed for the
//! rest of the run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::archive::{ArchiveError, ArchiveTool};
use crate::version::{Version, VersionFormatError};

const ARTIFACT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::artifact");
const ARTIFACT_PREFIX: &str = "vscode-reh-";
const ARCHIVE_EXTENSION: &str = "zip";
const PACKAGE_MANIFEST: &str = "package.json";
const SERVICE_BINARY: &str = "code-server-oss";

/// Host operating system and architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    os: &'static str,
    arch: &'static str,
}

impl Platform {
    /// Platform this binary was compiled for.
    #[must_use]
    pub const fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Builds a platform from Rust's `target_os`/`target_arch` spellings.
    #[must_use]
    pub const fn new(os: &'static str, arch: &'static str) -> Self {
        Self { os, arch }
    }

    /// Acceptable artifact suffixes in preference order.
    #[must_use]
    pub fn artifact_suffixes(self) -> &'static [&'static str] {
        match (self.os, self.arch) {
            ("macos", "aarch64") => &["darwin-arm64"],
            ("linux", "x86_64") => &["linux-x64", "linux-legacy-x64"],
            ("linux", "aarch64") => &["linux-arm64", "linux-legacy-arm64"],
            _ => &[],
        }
    }

    /// Acceptable artifact names in preference order.
    #[must_use]
    pub fn artifact_names(self) -> Vec<String> {
        self.artifact_suffixes()
            .iter()
            .map(|suffix| format!("{ARTIFACT_PREFIX}{suffix}"))
            .collect()
    }
}

/// Errors raised while locating an artifact or reading its version.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// No artifact names are defined for the host platform.
    #[error("platform {os} {arch} not supported")]
    UnsupportedPlatform {
        os: &'static str,
        arch: &'static str,
    },
    /// None of the acceptable artifact names is present.
    #[error("no service artifact detected (looked for: {})", .searched.join(", "))]
    Missing { searched: Vec<String> },
    /// More than one acceptable artifact name is present.
    #[error("multiple service artifacts with different platform suffixes found: {}", .found.join(", "))]
    Ambiguous { found: Vec<String> },
    /// The extracted artifact's manifest could not be read.
    #[error("failed to read artifact manifest '{path}': {source}")]
    ReadManifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The archive's manifest could not be read.
    #[error("failed to read manifest from archive: {source}")]
    Archive {
        #[source]
        source: ArchiveError,
    },
    /// The manifest is not valid JSON or lacks a version.
    #[error("invalid artifact manifest '{location}': {source}")]
    ParseManifest {
        location: String,
        #[source]
        source: serde_json::Error,
    },
    /// The manifest's version does not follow the version grammar.
    #[error(transparent)]
    Version(#[from] VersionFormatError),
}

/// Resolves which platform artifact is present on disk.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactLocator {
    platform: Platform,
}

impl ArtifactLocator {
    /// Builds a locator for `platform`.
    #[must_use]
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Scans `archive_dir` and `extract_dir` for exactly one artifact name.
    pub fn locate(
        &self,
        archive_dir: &Path,
        extract_dir: &Path,
    ) -> Result<ArtifactRef, ArtifactError> {
        let names = self.platform.artifact_names();
        if names.is_empty() {
            return Err(ArtifactError::UnsupportedPlatform {
                os: self.platform.os,
                arch: self.platform.arch,
            });
        }
        let mut present: Vec<ArtifactRef> = names
            .iter()
            .map(|name| ArtifactRef::new(name, archive_dir, extract_dir))
            .filter(ArtifactRef::exists)
            .collect();
        match present.len() {
            0 => Err(ArtifactError::Missing { searched: names }),
            1 => {
                let artifact = present.remove(0);
                info!(
                    target: ARTIFACT_TARGET,
                    name = artifact.name(),
                    extracted = artifact.is_extracted(),
                    packed = artifact.is_packed(),
                    "located service artifact"
                );
                Ok(artifact)
            }
            _ => Err(ArtifactError::Ambiguous {
                found: present.into_iter().map(|artifact| artifact.name).collect(),
            }),
        }
    }
}

/// A located, platform-qualified artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    name: String,
    extracted_dir: PathBuf,
    archive: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PackageManifest {
    version: String,
}

impl ArtifactRef {
    fn new(name: &str, archive_dir: &Path, extract_dir: &Path) -> Self {
        Self {
            name: name.to_owned(),
            extracted_dir: extract_dir.join(name),
            archive: archive_dir.join(name).with_extension(ARCHIVE_EXTENSION),
        }
    }

    fn exists(&self) -> bool {
        self.is_extracted() || self.is_packed()
    }

    /// Platform-qualified artifact name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory the artifact is (or will be) extracted to.
    #[must_use]
    pub fn extracted_dir(&self) -> &Path {
        &self.extracted_dir
    }

    /// Whether the extracted directory exists.
    #[must_use]
    pub fn is_extracted(&self) -> bool {
        self.extracted_dir.is_dir()
    }

    /// Whether the packed archive exists.
    #[must_use]
    pub fn is_packed(&self) -> bool {
        self.archive.is_file()
    }

    /// Executable that starts the managed service.
    #[must_use]
    pub fn service_binary(&self) -> PathBuf {
        self.extracted_dir.join("bin").join(SERVICE_BINARY)
    }

    /// Version of the extracted artifact, if one is extracted.
    pub fn installed_version(&self) -> Result<Option<Version>, ArtifactError> {
        if !self.is_extracted() {
            return Ok(None);
        }
        let path = self.extracted_dir.join(PACKAGE_MANIFEST);
        let bytes = fs::read(&path).map_err(|source| ArtifactError::ReadManifest {
            path: path.clone(),
            source,
        })?;
        manifest_version(&bytes, &path.display().to_string()).map(Some)
    }

    /// Version of the packed archive, read without extracting it.
    pub fn candidate_version(
        &self,
        tool: &dyn ArchiveTool,
    ) -> Result<Option<Version>, ArtifactError> {
        if !self.is_packed() {
            return Ok(None);
        }
        let member = format!("{}/{PACKAGE_MANIFEST}", self.name);
        let bytes = tool
            .read_member(&self.archive, &member)
            .map_err(|source| ArtifactError::Archive { source })?;
        let location = format!("{}:{member}", self.archive.display());
        manifest_version(&bytes, &location).map(Some)
    }

    /// Replaces any extracted copy with the contents of the archive.
    pub fn install(&self, tool: &dyn ArchiveTool, extract_dir: &Path) -> Result<(), InstallError> {
        if self.is_extracted() {
            info!(
                target: ARTIFACT_TARGET,
                path = %self.extracted_dir.display(),
                "removing existing extracted artifact"
            );
            fs::remove_dir_all(&self.extracted_dir).map_err(|source| InstallError::Remove {
                path: self.extracted_dir.clone(),
                source,
            })?;
        }
        info!(
            target: ARTIFACT_TARGET,
            archive = %self.archive.display(),
            destination = %extract_dir.display(),
            "extracting artifact from archive"
        );
        tool.extract(&self.archive, extract_dir)?;
        Ok(())
    }
}

/// Errors raised while replacing the extracted artifact.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The stale extracted copy could not be removed.
    #[error("failed to remove existing artifact '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The archive could not be extracted.
    #[error("failed to extract artifact: {0}")]
    Extract(#[from] ArchiveError),
}

fn manifest_version(bytes: &[u8], location: &str) -> Result<Version, ArtifactError> {
    let manifest: PackageManifest =
        serde_json::from_slice(bytes).map_err(|source| ArtifactError::ParseManifest {
            location: location.to_owned(),
            source,
        })?;
    Ok(manifest.version.parse()?)
}

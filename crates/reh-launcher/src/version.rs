//! Version strings of the form `supermajor.major.minor-m<modrev>`.
//!
//! [`Version`] orders lexicographically over its four components, which is
//! the order the upgrade decision relies on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Four-component artifact version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    supermajor: u64,
    major: u64,
    minor: u64,
    modrev: u64,
}

/// Raised when a version string does not match `<int>.<int>.<int>-m<int>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("version number '{input}' not recognized")]
pub struct VersionFormatError {
    input: String,
}

impl VersionFormatError {
    fn new(input: &str) -> Self {
        Self {
            input: input.to_owned(),
        }
    }
}

impl Version {
    /// Builds a version from its components.
    #[must_use]
    pub const fn new(supermajor: u64, major: u64, minor: u64, modrev: u64) -> Self {
        Self {
            supermajor,
            major,
            minor,
            modrev,
        }
    }

    /// Components as `(supermajor, major, minor, modrev)`.
    #[must_use]
    pub const fn components(self) -> (u64, u64, u64, u64) {
        (self.supermajor, self.major, self.minor, self.modrev)
    }
}

impl FromStr for Version {
    type Err = VersionFormatError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let error = || VersionFormatError::new(input);
        let (triple, suffix) = input.split_once('-').ok_or_else(error)?;
        let modrev = suffix.strip_prefix('m').ok_or_else(error)?;
        let mut parts = triple.split('.');
        let (Some(supermajor), Some(major), Some(minor), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(error());
        };
        Ok(Self {
            supermajor: component(supermajor).ok_or_else(error)?,
            major: component(major).ok_or_else(error)?,
            minor: component(minor).ok_or_else(error)?,
            modrev: component(modrev).ok_or_else(error)?,
        })
    }
}

// `u64::from_str` tolerates a leading `+`; the grammar only admits digits.
fn component(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

impl fmt::Display for Version {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}.{}.{}-m{}",
            self.supermajor, self.major, self.minor, self.modrev
        )
    }
}

impl TryFrom<String> for Version {
    type Error = VersionFormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

/// Decides whether `candidate` should replace `current`.
///
/// Nothing installed means any candidate is an upgrade; no candidate means
/// the current installation is kept. The candidate check comes first, so a
/// call with both sides absent answers `false`.
#[must_use]
pub fn is_newer(current: Option<Version>, candidate: Option<Version>) -> bool {
    match (current, candidate) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(current), Some(candidate)) => candidate > current,
    }
}

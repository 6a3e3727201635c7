//! Core types shared by the sweep stages

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

/// Version identifier: a branch name or release tag to check out
///
/// Doubles as the stem of the archived results file. Branch names may be
/// nested (`release/0.20`); each `/` becomes `__` in the file stem so the
/// archive stays flat.
///
/// # Examples
/// - `master` → `stats/master.csv`
/// - `0.14.0` → `stats/0.14.0.csv`
/// - `release/0.20` → `stats/release__0.20.csv`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId(String);

impl VersionId {
    /// Create a validated version identifier
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidVersionId` if the identifier is empty,
    /// contains whitespace or `\\`, starts with `-`, or has a `/`-separated
    /// segment that is empty or starts with `.`.
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigError> {
        let id = id.into();
        let reason = if id.is_empty() {
            Some("must not be empty")
        } else if id.contains('\\') {
            Some("must not contain '\\'")
        } else if id.chars().any(char::is_whitespace) {
            Some("must not contain whitespace")
        } else if id.starts_with('-') {
            Some("must not start with '-'")
        } else if id.split('/').any(str::is_empty) {
            Some("must not have empty '/' segments")
        } else if id.split('/').any(|segment| segment.starts_with('.')) {
            Some("segments must not start with '.'")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ConfigError::InvalidVersionId {
                value: id,
                reason: reason.to_string(),
            }),
            None => Ok(Self(id)),
        }
    }

    /// Built-in identifiers known to be valid
    pub(crate) fn from_static(id: &'static str) -> Self {
        Self(id.to_string())
    }

    /// Identifier as passed to version control
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stem of this version's archived results file
    #[must_use]
    pub fn archive_stem(&self) -> String {
        self.0.replace('/', "__")
    }

    /// File name of this version's archived results
    #[inline]
    #[must_use]
    pub fn archive_file_name(&self) -> String {
        format!("{}.csv", self.archive_stem())
    }
}

impl Display for VersionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl FromStr for VersionId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for VersionId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VersionId> for String {
    fn from(value: VersionId) -> Self {
        value.0
    }
}

impl AsRef<str> for VersionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Handle to the active isolated environment
///
/// Resolved once during initialization and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentHandle {
    /// Environment name
    pub name: String,
    /// Installation prefix every install step targets
    pub prefix: PathBuf,
}

/// Whether a local clone already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutState {
    /// No clone directory yet
    Absent,
    /// Clone directory with a `.git` entry
    Present,
}

/// Stage of a single version's pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SweepStage {
    /// Version control checkout
    Checkout,
    /// Header version resolution
    Resolve,
    /// Install into the environment
    Install,
    /// Benchmark configure, build and run
    Benchmark,
    /// Result file archival
    Archive,
}

impl SweepStage {
    /// Stage name used in logs and reports
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checkout => "checkout",
            Self::Resolve => "resolve",
            Self::Install => "install",
            Self::Benchmark => "benchmark",
            Self::Archive => "archive",
        }
    }
}

impl Display for SweepStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_id_accepts_branches_and_tags() {
        assert_eq!(VersionId::new("master").unwrap().as_str(), "master");
        assert_eq!(VersionId::new("0.14.0").unwrap().as_str(), "0.14.0");
        assert_eq!(VersionId::new("v0.20.8").unwrap().to_string(), "v0.20.8");
    }

    #[test]
    fn version_id_rejects_unsafe_names() {
        for bad in [
            "", "a b", "..", ".hidden", "-rf", "a\\b", "/abs", "release/", "a//b", "a/../b", "a/.x",
        ] {
            assert!(VersionId::new(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn nested_branch_gets_flat_archive_name() {
        let v = VersionId::new("release/0.20").unwrap();
        assert_eq!(v.as_str(), "release/0.20");
        assert_eq!(v.archive_stem(), "release__0.20");
        assert_eq!(v.archive_file_name(), "release__0.20.csv");
    }

    #[test]
    fn version_id_display_pads() {
        let v = VersionId::new("master").unwrap();
        assert_eq!(format!("[{v:<8}]"), "[master  ]");
    }

    #[test]
    fn version_id_archive_file_name() {
        let v: VersionId = "0.14.0".parse().unwrap();
        assert_eq!(v.archive_file_name(), "0.14.0.csv");
    }

    #[test]
    fn version_id_serde_validates() {
        let ok: VersionId = serde_json::from_str("\"master\"").unwrap();
        assert_eq!(ok.as_str(), "master");
        assert!(serde_json::from_str::<VersionId>("\"a/../b\"").is_err());
    }

    #[test]
    fn stage_names() {
        assert_eq!(SweepStage::Checkout.to_string(), "checkout");
        assert_eq!(SweepStage::Archive.as_str(), "archive");
    }
}

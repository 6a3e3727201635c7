//! Release version resolution from a C/C++ header
//!
//! The library reports its version through three compile-time constants:
//!
//! ```text
//! #define XTENSOR_VERSION_MAJOR 0
//! #define XTENSOR_VERSION_MINOR 15
//! #define XTENSOR_VERSION_PATCH 4
//! ```

use crate::error::VersionError;
use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::path::Path;

/// Release version parsed from a header
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResolvedVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ResolvedVersion {
    #[inline]
    #[must_use]
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Display for ResolvedVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

const COMPONENTS: [&str; 3] = ["MAJOR", "MINOR", "PATCH"];

/// Parse the three version constants out of header text
///
/// A line counts when its first whitespace token is `#define` and its
/// second is `<PREFIX>_VERSION_<COMPONENT>`; the value is the line's last
/// token. Lines may appear in any order; a repeated constant keeps the
/// last value seen.
///
/// # Errors
/// - `VersionError::MissingConstant` if a constant never appears
/// - `VersionError::InvalidConstant` if a value is not a `u32`
pub fn parse_version_header(text: &str, macro_prefix: &str) -> Result<ResolvedVersion, VersionError> {
    let names = COMPONENTS.map(|c| format!("{macro_prefix}_VERSION_{c}"));
    let mut found: [Option<u32>; 3] = [None; 3];

    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 || tokens[0] != "#define" {
            continue;
        }
        let Some(slot) = names.iter().position(|n| n == tokens[1]) else {
            continue;
        };
        let raw = tokens[tokens.len() - 1];
        let value = raw.parse::<u32>().map_err(|_| VersionError::InvalidConstant {
            name: names[slot].clone(),
            value: raw.to_string(),
        })?;
        found[slot] = Some(value);
    }

    let take = |slot: usize| {
        found[slot].ok_or_else(|| VersionError::MissingConstant {
            name: names[slot].clone(),
        })
    };
    Ok(ResolvedVersion::new(take(0)?, take(1)?, take(2)?))
}

/// Read a header file and resolve its version
///
/// # Errors
/// Returns `VersionError::Io` if the file cannot be read, otherwise the
/// errors of [`parse_version_header`].
pub fn resolve_version(header: &Path, macro_prefix: &str) -> Result<ResolvedVersion, VersionError> {
    let text = std::fs::read_to_string(header).map_err(|source| VersionError::Io {
        path: header.to_path_buf(),
        source,
    })?;
    let version = parse_version_header(&text, macro_prefix)?;
    tracing::debug!("resolved {} from {}", version, header.display());
    Ok(version)
}

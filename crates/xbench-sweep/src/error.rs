//! Error types for the version sweep
//!
//! Provides error handling for:
//! - External command failures (spawn errors and non-zero exits)
//! - Configuration loading and validation
//! - Environment initialization
//! - Per-version stages (checkout, resolve, install, benchmark, archive)

use crate::types::{SweepStage, VersionId};
use std::path::PathBuf;

/// Errors from running an external command
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The program could not be started
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited unsuccessfully
    #[error("`{command}` failed with {}", exit_description(.exit_code))]
    Failed {
        command: String,
        /// `None` when terminated by a signal
        exit_code: Option<i32>,
        /// Tail of the captured standard error
        stderr: String,
    },
}

impl CommandError {
    /// Exit code of a failed command, if it exited normally
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { exit_code, .. } => *exit_code,
            Self::Spawn { .. } => None,
        }
    }

    /// Rendered command line
    #[must_use]
    pub fn command(&self) -> &str {
        match self {
            Self::Spawn { command, .. } | Self::Failed { command, .. } => command,
        }
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".to_string(),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading the configuration file
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or schema error
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Version identifier cannot be used as checkout target and file stem
    #[error("invalid version identifier '{value}': {reason}")]
    InvalidVersionId { value: String, reason: String },

    /// Semantic validation failed
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Environment initialization errors (always fatal)
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    /// Package manager command failed
    #[error("package manager error: {0}")]
    Command(#[from] CommandError),

    /// Environment listing was not the expected JSON
    #[error("unreadable environment list: {0}")]
    InvalidEnvList(#[from] serde_json::Error),

    /// No usable installation prefix could be found
    #[error("cannot resolve installation prefix of environment '{name}'")]
    Unresolved { name: String },

    /// Archive directory could not be reset
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

/// Version control checkout errors
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    /// Clone directory exists but is not a git working copy
    #[error("{0} exists but is not a git repository")]
    NotARepository(PathBuf),

    /// IO error preparing the checkouts directory
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Git command failed
    #[error("git error: {0}")]
    Command(#[from] CommandError),
}

/// Header version resolution errors
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    /// IO error reading the header
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A `#define` was never found
    #[error("version constant {name} not found")]
    MissingConstant { name: String },

    /// A `#define` value is not a non-negative integer
    #[error("version constant {name} has non-integer value '{value}'")]
    InvalidConstant { name: String, value: String },
}

/// Install errors
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// IO error preparing the build directory
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Build system or package manager failed
    #[error("install command error: {0}")]
    Command(#[from] CommandError),

    /// Installed header not found under the prefix
    #[error("installed header not found at {0}")]
    HeaderMissing(PathBuf),

    /// Installed header unreadable or malformed
    #[error("installed header unreadable: {0}")]
    Header(#[from] VersionError),

    /// Prefix holds a different version than the one checked out
    #[error("installed version {installed} does not match expected {expected}")]
    VersionMismatch { expected: String, installed: String },
}

/// Result archival errors
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Benchmark did not produce its result file
    #[error("benchmark result file missing: {0}")]
    MissingArtifact(PathBuf),

    /// Benchmark produced an empty result file
    #[error("benchmark result file is empty: {0}")]
    EmptyArtifact(PathBuf),

    /// IO error moving or listing files
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Build-and-benchmark errors
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// IO error preparing the build directory
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configure or build failed
    #[error("benchmark command error: {0}")]
    Command(#[from] CommandError),

    /// Archive directory could not be created
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

/// Failure of one stage of a version's pipeline
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Bench(#[from] BenchError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl StageError {
    /// Stage that produced this error
    #[must_use]
    pub fn stage(&self) -> SweepStage {
        match self {
            Self::Checkout(_) => SweepStage::Checkout,
            Self::Version(_) => SweepStage::Resolve,
            Self::Install(_) => SweepStage::Install,
            Self::Bench(_) => SweepStage::Benchmark,
            Self::Archive(_) => SweepStage::Archive,
        }
    }

    /// Underlying external command failure, if any
    #[must_use]
    pub fn command_error(&self) -> Option<&CommandError> {
        match self {
            Self::Checkout(CheckoutError::Command(e))
            | Self::Install(InstallError::Command(e))
            | Self::Bench(BenchError::Command(e)) => Some(e),
            _ => None,
        }
    }
}

/// Main sweep error type
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Environment could not be set up
    #[error("environment error: {0}")]
    Environment(#[from] EnvironmentError),

    /// A version failed and the failure policy aborts the sweep
    #[error("version {version} failed during {stage}: {source}")]
    Version {
        version: VersionId,
        stage: SweepStage,
        #[source]
        source: StageError,
    },
}

impl SweepError {
    /// Build a version failure from a stage error
    pub fn version(version: VersionId, source: StageError) -> Self {
        Self::Version {
            version,
            stage: source.stage(),
            source,
        }
    }
}

/// Result type alias for sweep operations
pub type SweepResult<T> = Result<T, SweepError>;

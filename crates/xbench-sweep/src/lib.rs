//! xbench-sweep - Version Sweep Runner
//!
//! Benchmarks successive versions of a numerical library:
//! - Initializes an isolated package-manager environment once
//! - Checks out each version from version control
//! - Resolves the release version from the library's own header
//! - Installs that version into the environment
//! - Builds and runs the benchmark binary against it
//! - Archives the benchmark's CSV output as `<version>.csv`
//!
//! Everything runs sequentially; every external tool is invoked through a
//! [`CommandRunner`] and blocks until it exits.
//!
//! # Example
//!
//! ```rust,ignore
//! use xbench_sweep::{ProcessRunner, SweepConfig, SweepRunner};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SweepConfig::discover(".")?;
//! let runner = SweepRunner::new(config, ProcessRunner::new());
//!
//! let report = runner.run()?;
//! println!("{} of {} versions archived", report.archived(), report.outcomes.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod archive;
pub mod bench;
pub mod checkout;
pub mod command;
pub mod config;
pub mod environment;
pub mod error;
pub mod install;
pub mod sweep;
pub mod types;
pub mod version;

pub use archive::{ArchiveDir, ArchiveMismatch};
pub use command::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use config::{
    BenchmarkConfig, EnvironmentConfig, FailurePolicy, InstallStrategy, LibraryConfig,
    SweepConfig, SweepPaths, ToolsConfig, CONFIG_FILE_NAME,
};
pub use error::{
    ArchiveError, BenchError, CheckoutError, CommandError, ConfigError, EnvironmentError,
    InstallError, StageError, SweepError, VersionError,
};
pub use sweep::{SweepReport, SweepRunner, VersionOutcome, VersionStatus};
pub use types::{CheckoutState, EnvironmentHandle, SweepStage, VersionId};
pub use version::ResolvedVersion;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a sweep
    pub use crate::{
        CommandRunner, FailurePolicy, InstallStrategy, ProcessRunner, SweepConfig, SweepError,
        SweepReport, SweepRunner, VersionId,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

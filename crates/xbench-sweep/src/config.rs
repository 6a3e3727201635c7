//! Configuration loading from xbench-sweep.toml
//!
//! The sweep can be configured with an `xbench-sweep.toml` file in the
//! project root. Every section is optional; the defaults reproduce the
//! classic xtensor sweep over `master` and `0.14.0`.
//!
//! ```toml
//! versions = ["master", "0.14.0"]
//! on-failure = "continue"
//!
//! [install]
//! strategy = "package"
//! channel = "conda-forge"
//!
//! [benchmark]
//! cmake-flags = ["-DBENCHMARK_EIGEN=ON"]
//! ```

use crate::error::ConfigError;
use crate::types::VersionId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// Name of the configuration file looked up in the root directory
pub const CONFIG_FILE_NAME: &str = "xbench-sweep.toml";

/// Top-level sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SweepConfig {
    /// Directory every relative path is resolved against
    pub root: PathBuf,
    /// Versions to sweep, in order
    pub versions: Vec<VersionId>,
    /// What to do when a version fails
    pub on_failure: FailurePolicy,
    /// Library under test
    pub library: LibraryConfig,
    /// Isolated environment
    pub environment: EnvironmentConfig,
    /// How a version gets into the environment
    pub install: InstallStrategy,
    /// External tool programs
    pub tools: ToolsConfig,
    /// Benchmark build and archive layout
    pub benchmark: BenchmarkConfig,
}

impl SweepConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    ///
    /// A relative `root` is resolved against the file's directory and made
    /// absolute, since tools run from several working directories.
    ///
    /// # Errors
    /// Returns `ConfigError::Io` or `ConfigError::Parse`, or a validation
    /// error from [`SweepConfig::validate`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if config.root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.root = absolute(&base.join(&config.root))?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load `<root>/xbench-sweep.toml` if present, else defaults rooted at `root`
    ///
    /// # Errors
    /// Returns the errors of [`SweepConfig::load`] when the file exists.
    pub fn discover(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref();
        let path = root.join(CONFIG_FILE_NAME);
        if path.is_file() {
            tracing::debug!("loading configuration from {}", path.display());
            Self::load(path)
        } else {
            Ok(Self::default().with_root(absolute(root)?))
        }
    }

    /// Check semantic constraints
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` for an empty or duplicated version
    /// list, for empty names that later become paths or arguments, and for
    /// benchmark directories that escape the root or overlap each other.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.versions.is_empty() {
            return Err(ConfigError::Invalid("version list is empty".to_string()));
        }

        let mut seen = HashSet::new();
        let mut stems = HashSet::new();
        for version in &self.versions {
            if !seen.insert(version) {
                return Err(ConfigError::Invalid(format!(
                    "version '{version}' listed more than once"
                )));
            }
            if !stems.insert(version.archive_stem()) {
                return Err(ConfigError::Invalid(format!(
                    "version '{version}' collides with another version's archive file"
                )));
            }
        }

        let required = [
            ("library.name", &self.library.name),
            ("library.url", &self.library.url),
            ("library.head-ref", &self.library.head_ref),
            ("library.macro-prefix", &self.library.macro_prefix),
            ("environment.name", &self.environment.name),
            ("benchmark.target", &self.benchmark.target),
            ("benchmark.results-file", &self.benchmark.results_file),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{key} must not be empty")));
            }
        }
        if self.library.name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(
                "library.name must be a single path component".to_string(),
            ));
        }
        let results_file = self.benchmark.results_file.as_str();
        if results_file.contains(['/', '\\']) || matches!(results_file, "." | "..") {
            return Err(ConfigError::Invalid(
                "benchmark.results-file must be a single path component".to_string(),
            ));
        }

        // the archive is removed wholesale on every run
        let dirs = [
            ("benchmark.build-dir", &self.benchmark.build_dir),
            ("benchmark.archive-dir", &self.benchmark.archive_dir),
            ("benchmark.checkouts-dir", &self.benchmark.checkouts_dir),
        ];
        for (key, dir) in dirs {
            check_subdirectory(key, dir)?;
        }
        for (i, (key, dir)) in dirs.iter().enumerate() {
            for (other_key, other) in &dirs[i + 1..] {
                if dir.starts_with(other) || other.starts_with(dir) {
                    return Err(ConfigError::Invalid(format!(
                        "{key} and {other_key} must not overlap"
                    )));
                }
            }
        }
        if let InstallStrategy::Package { channel } = &self.install {
            if channel.trim().is_empty() {
                return Err(ConfigError::Invalid("install.channel must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// With root directory
    #[inline]
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// With version list
    #[inline]
    #[must_use]
    pub fn with_versions(mut self, versions: Vec<VersionId>) -> Self {
        self.versions = versions;
        self
    }

    /// With install strategy
    #[inline]
    #[must_use]
    pub fn with_strategy(mut self, strategy: InstallStrategy) -> Self {
        self.install = strategy;
        self
    }

    /// With failure policy
    #[inline]
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// With explicit environment prefix
    #[inline]
    #[must_use]
    pub fn with_environment_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.environment.prefix = Some(prefix.into());
        self
    }

    /// Filesystem layout derived from this configuration
    #[must_use]
    pub fn paths(&self) -> SweepPaths {
        let root = self.root.clone();
        let checkouts = root.join(&self.benchmark.checkouts_dir);
        let clone_dir = checkouts.join(&self.library.name);
        SweepPaths {
            library_build: clone_dir.join("build"),
            version_header: clone_dir.join(&self.library.version_header),
            bench_build: root.join(&self.benchmark.build_dir),
            archive: root.join(&self.benchmark.archive_dir),
            environment_file: root.join(&self.environment.file),
            checkouts,
            clone_dir,
            root,
        }
    }
}

/// Require a non-empty path below the root made only of plain components
fn check_subdirectory(key: &str, dir: &Path) -> Result<(), ConfigError> {
    let mut components = dir.components().peekable();
    if components.peek().is_none() {
        return Err(ConfigError::Invalid(format!("{key} must not be empty")));
    }
    if components.all(|c| matches!(c, Component::Normal(_))) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{key} must be a relative path below the root, got '{}'",
            dir.display()
        )))
    }
}

/// Make `path` absolute against the current directory
fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(cwd.join(path))
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            versions: vec![
                VersionId::from_static("master"),
                VersionId::from_static("0.14.0"),
            ],
            on_failure: FailurePolicy::default(),
            library: LibraryConfig::default(),
            environment: EnvironmentConfig::default(),
            install: InstallStrategy::default(),
            tools: ToolsConfig::default(),
            benchmark: BenchmarkConfig::default(),
        }
    }
}

/// Behavior when one version's pipeline fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop the sweep at the first failing version
    #[default]
    Abort,
    /// Record the failure and move on to the next version
    Continue,
}

/// Library under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LibraryConfig {
    /// Name, also the clone directory under the checkouts root
    pub name: String,
    /// Upstream repository URL
    pub url: String,
    /// Mutable branch fast-forwarded before each checkout
    pub head_ref: String,
    /// Header holding the version constants, relative to the source tree
    /// and to the installation prefix
    pub version_header: PathBuf,
    /// Prefix of the `<PREFIX>_VERSION_*` constants
    pub macro_prefix: String,
    /// Package name for package-manager installs
    pub package: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            name: "xtensor".to_string(),
            url: "https://github.com/QuantStack/xtensor".to_string(),
            head_ref: "master".to_string(),
            version_header: PathBuf::from("include/xtensor/xtensor_config.hpp"),
            macro_prefix: "XTENSOR".to_string(),
            package: "xtensor".to_string(),
        }
    }
}

/// Isolated package-manager environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EnvironmentConfig {
    /// Environment name
    pub name: String,
    /// Declarative environment specification, relative to the root
    pub file: PathBuf,
    /// Installation prefix override; skips discovery when set
    pub prefix: Option<PathBuf>,
    /// Package manager program
    pub manager: String,
    /// Variable holding the active environment's prefix
    pub prefix_var: String,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            name: "xtensor-benchmark".to_string(),
            file: PathBuf::from("environment.yml"),
            prefix: None,
            manager: "conda".to_string(),
            prefix_var: "CONDA_PREFIX".to_string(),
        }
    }
}

/// How a resolved version is installed into the environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum InstallStrategy {
    /// Configure and install the checkout with the native build system
    Source,
    /// Install the exact resolved version from a package channel
    Package {
        #[serde(default = "default_channel")]
        channel: String,
    },
}

impl InstallStrategy {
    /// Package strategy on the default channel
    #[must_use]
    pub fn package() -> Self {
        Self::Package {
            channel: default_channel(),
        }
    }

    /// Short name used in logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Package { .. } => "package",
        }
    }
}

impl Default for InstallStrategy {
    fn default() -> Self {
        Self::Source
    }
}

fn default_channel() -> String {
    "conda-forge".to_string()
}

/// External tool programs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ToolsConfig {
    pub git: String,
    pub cmake: String,
    pub make: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            cmake: "cmake".to_string(),
            make: "make".to_string(),
        }
    }
}

/// Benchmark build and result layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BenchmarkConfig {
    /// Build target that builds and runs the benchmark
    pub target: String,
    /// File the benchmark writes into the build directory
    pub results_file: String,
    /// Extra configure flags, e.g. `-DBENCHMARK_EIGEN=ON`
    pub cmake_flags: Vec<String>,
    /// Benchmark build directory, relative to the root
    pub build_dir: PathBuf,
    /// Archive directory, relative to the root
    pub archive_dir: PathBuf,
    /// Checkouts root, relative to the root
    pub checkouts_dir: PathBuf,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            target: "xbenchmark".to_string(),
            results_file: "results.csv".to_string(),
            cmake_flags: Vec::new(),
            build_dir: PathBuf::from("build"),
            archive_dir: PathBuf::from("stats"),
            checkouts_dir: PathBuf::from("checkouts"),
        }
    }
}

/// Absolute filesystem layout of a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepPaths {
    /// Root directory
    pub root: PathBuf,
    /// `<root>/checkouts`
    pub checkouts: PathBuf,
    /// `<root>/checkouts/<library>`
    pub clone_dir: PathBuf,
    /// `<root>/checkouts/<library>/build`
    pub library_build: PathBuf,
    /// Version header inside the clone
    pub version_header: PathBuf,
    /// `<root>/build`
    pub bench_build: PathBuf,
    /// `<root>/stats`
    pub archive: PathBuf,
    /// Environment specification file
    pub environment_file: PathBuf,
}

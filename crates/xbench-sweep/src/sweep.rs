//! Sweep driver
//!
//! Runs the whole pipeline:
//! - Initializes the environment once (fatal on failure)
//! - Sweeps the configured versions strictly in list order
//! - Applies the failure policy when a version fails
//! - Collects a report of every version's outcome

use crate::archive::ArchiveDir;
use crate::bench::build_and_bench;
use crate::checkout::checkout_version;
use crate::command::CommandRunner;
use crate::config::{FailurePolicy, SweepConfig};
use crate::environment;
use crate::error::{StageError, SweepError};
use crate::install::install_version;
use crate::types::{EnvironmentHandle, SweepStage, VersionId};
use crate::version::{resolve_version, ResolvedVersion};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Drives a sweep over the configured versions
#[derive(Debug)]
pub struct SweepRunner<R> {
    config: SweepConfig,
    runner: R,
    /// Active environment prefix captured at construction
    ambient_prefix: Option<PathBuf>,
}

impl<R: CommandRunner> SweepRunner<R> {
    /// Create runner; captures the active environment prefix variable
    #[must_use]
    pub fn new(config: SweepConfig, runner: R) -> Self {
        let ambient_prefix = std::env::var_os(&config.environment.prefix_var).map(PathBuf::from);
        Self {
            config,
            runner,
            ambient_prefix,
        }
    }

    /// Override the captured active environment prefix
    #[inline]
    #[must_use]
    pub fn with_ambient_prefix(mut self, prefix: Option<PathBuf>) -> Self {
        self.ambient_prefix = prefix;
        self
    }

    /// Configuration this runner sweeps with
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Underlying command runner
    #[inline]
    #[must_use]
    pub fn command_runner(&self) -> &R {
        &self.runner
    }

    /// Initialize the environment and reset the archive without sweeping
    ///
    /// The configuration is validated first, so nothing is touched on disk
    /// for an invalid one.
    ///
    /// # Errors
    /// - `SweepError::Config` for invalid configuration
    /// - `SweepError::Environment` if no prefix can be resolved
    pub fn initialize(&self) -> Result<EnvironmentHandle, SweepError> {
        self.config.validate()?;
        let handle =
            environment::initialize(&self.runner, &self.config, self.ambient_prefix.as_deref())?;
        Ok(handle)
    }

    /// Run the full sweep
    ///
    /// # Workflow
    /// 1. Validate configuration
    /// 2. Initialize environment and clear the archive
    /// 3. For each version: checkout, resolve, install, benchmark, archive
    ///
    /// # Errors
    /// - `SweepError::Config` for invalid configuration
    /// - `SweepError::Environment` if initialization fails
    /// - `SweepError::Version` for the first failing version under
    ///   [`FailurePolicy::Abort`]
    pub fn run(&self) -> Result<SweepReport, SweepError> {
        let started_at = Utc::now();

        let env = self.initialize()?;
        let archive = ArchiveDir::new(self.config.paths().archive);

        tracing::info!(
            "sweeping {} versions of {} with {} install",
            self.config.versions.len(),
            self.config.library.name,
            self.config.install.name()
        );

        let mut outcomes = Vec::with_capacity(self.config.versions.len());
        for version in &self.config.versions {
            let mut resolved = None;
            match self.sweep_version(&env, &archive, version, &mut resolved) {
                Ok(path) => {
                    tracing::info!("version {} done", version);
                    outcomes.push(VersionOutcome::archived(version.clone(), resolved, path));
                }
                Err(e) => {
                    tracing::error!("version {} failed during {}: {}", version, e.stage(), e);
                    match self.config.on_failure {
                        FailurePolicy::Abort => return Err(SweepError::version(version.clone(), e)),
                        FailurePolicy::Continue => {
                            outcomes.push(VersionOutcome::failed(version.clone(), resolved, &e));
                        }
                    }
                }
            }
        }

        match archive.verify(&self.config.versions) {
            Ok(mismatch) if !mismatch.unexpected.is_empty() => {
                tracing::warn!("unexpected archive entries: {:?}", mismatch.unexpected);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("cannot list archive: {}", e),
        }

        let report = SweepReport {
            started_at,
            finished_at: Utc::now(),
            environment: env,
            strategy: self.config.install.name().to_string(),
            outcomes,
        };
        tracing::info!(
            "sweep finished: {} archived, {} failed",
            report.archived(),
            report.failed()
        );
        Ok(report)
    }

    /// One version's pipeline
    ///
    /// `resolved` is filled in as soon as resolution succeeds so a later
    /// failure still reports it.
    fn sweep_version(
        &self,
        env: &EnvironmentHandle,
        archive: &ArchiveDir,
        version: &VersionId,
        resolved: &mut Option<ResolvedVersion>,
    ) -> Result<PathBuf, StageError> {
        let config = &self.config;
        tracing::info!("version {}: {}", version, SweepStage::Checkout);
        checkout_version(&self.runner, config, version)?;

        tracing::info!("version {}: {}", version, SweepStage::Resolve);
        let header = config.paths().version_header;
        let release = resolve_version(&header, &config.library.macro_prefix)?;
        tracing::info!("{} resolves to {}", version, release);
        *resolved = Some(release);

        tracing::info!("version {}: {}", version, SweepStage::Install);
        install_version(&self.runner, config, env, &release)?;

        tracing::info!("version {}: {}", version, SweepStage::Benchmark);
        let results = build_and_bench(&self.runner, config, env)?;

        tracing::info!("version {}: {}", version, SweepStage::Archive);
        Ok(archive.archive(version, &results)?)
    }
}

/// Final state of one version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionStatus {
    /// Results archived
    Archived,
    /// A stage failed; nothing archived
    Failed,
}

/// Outcome of one version's pipeline
#[derive(Debug, Clone, Serialize)]
pub struct VersionOutcome {
    pub version: VersionId,
    pub status: VersionStatus,
    /// Release version from the header, when resolution got that far
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<SweepStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VersionOutcome {
    fn archived(version: VersionId, resolved: Option<ResolvedVersion>, archive: PathBuf) -> Self {
        Self {
            version,
            status: VersionStatus::Archived,
            resolved,
            archive: Some(archive),
            failed_stage: None,
            error: None,
        }
    }

    fn failed(version: VersionId, resolved: Option<ResolvedVersion>, error: &StageError) -> Self {
        Self {
            version,
            status: VersionStatus::Failed,
            resolved,
            archive: None,
            failed_stage: Some(error.stage()),
            error: Some(error.to_string()),
        }
    }

    /// Archived results file, if any
    #[must_use]
    pub fn archive_path(&self) -> Option<&Path> {
        self.archive.as_deref()
    }
}

/// Result of a completed sweep
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Environment every version was installed into
    pub environment: EnvironmentHandle,
    /// Install strategy name
    pub strategy: String,
    /// Per-version outcomes in sweep order
    pub outcomes: Vec<VersionOutcome>,
}

impl SweepReport {
    /// Number of versions with archived results
    #[must_use]
    pub fn archived(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == VersionStatus::Archived)
            .count()
    }

    /// Number of failed versions
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.archived()
    }

    /// Whether every version was archived
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Outcome of a specific version
    #[must_use]
    pub fn outcome(&self, version: &str) -> Option<&VersionOutcome> {
        self.outcomes.iter().find(|o| o.version.as_str() == version)
    }

    /// Wall-clock duration of the sweep
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, MockCommandRunner};
    use crate::error::{ArchiveError, EnvironmentError};

    #[test]
    fn invalid_config_runs_nothing() {
        let runner = MockCommandRunner::new();
        let config = SweepConfig::new().with_versions(Vec::new());
        let sweep = SweepRunner::new(config, runner).with_ambient_prefix(None);
        assert!(matches!(sweep.run(), Err(SweepError::Config(_))));
    }

    #[test]
    fn invalid_archive_dir_is_rejected_before_clearing() {
        let root = tempfile::tempdir().unwrap();
        let keep = root.path().join("keep.txt");
        std::fs::write(&keep, "do not remove").unwrap();

        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();
        let mut config = SweepConfig::new().with_root(root.path());
        config.benchmark.archive_dir = PathBuf::from(".");

        let sweep = SweepRunner::new(config, runner).with_ambient_prefix(None);
        assert!(matches!(sweep.initialize(), Err(SweepError::Config(_))));
        assert!(matches!(sweep.run(), Err(SweepError::Config(_))));
        assert!(keep.is_file());
    }

    #[test]
    fn environment_failure_is_fatal_under_continue() {
        let root = tempfile::tempdir().unwrap();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::success(r#"{"envs": []}"#)));

        let config = SweepConfig::new()
            .with_root(root.path())
            .with_failure_policy(FailurePolicy::Continue);
        let sweep = SweepRunner::new(config, runner).with_ambient_prefix(None);
        assert!(matches!(
            sweep.run(),
            Err(SweepError::Environment(EnvironmentError::Unresolved { .. }))
        ));
    }

    #[test]
    fn checkout_failure_aborts_with_version_and_stage() {
        let root = tempfile::tempdir().unwrap();
        let prefix = root.path().join("env");
        std::fs::create_dir_all(&prefix).unwrap();

        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|spec| {
            if spec.starts_with(&["git"]) {
                Ok(CommandOutput::failure(128, "fatal: repository not found"))
            } else {
                Ok(CommandOutput::success(r#"{"envs": []}"#))
            }
        });

        let config = SweepConfig::new()
            .with_root(root.path())
            .with_environment_prefix(&prefix);
        let sweep = SweepRunner::new(config, runner);
        match sweep.run() {
            Err(SweepError::Version { version, stage, .. }) => {
                assert_eq!(version.as_str(), "master");
                assert_eq!(stage, SweepStage::Checkout);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn report_counts_and_serializes() {
        let failure: StageError = ArchiveError::MissingArtifact("build/results.csv".into()).into();
        let report = SweepReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            environment: EnvironmentHandle {
                name: "xtensor-benchmark".to_string(),
                prefix: PathBuf::from("/opt/conda/envs/xtensor-benchmark"),
            },
            strategy: "source".to_string(),
            outcomes: vec![
                VersionOutcome::archived(
                    VersionId::new("master").unwrap(),
                    Some(ResolvedVersion::new(0, 15, 4)),
                    PathBuf::from("stats/master.csv"),
                ),
                VersionOutcome::failed(
                    VersionId::new("0.14.0").unwrap(),
                    Some(ResolvedVersion::new(0, 14, 0)),
                    &failure,
                ),
            ],
        };

        assert_eq!(report.archived(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_success());
        assert_eq!(
            report.outcome("master").and_then(VersionOutcome::archive_path),
            Some(Path::new("stats/master.csv"))
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcomes"][0]["status"], "archived");
        assert_eq!(json["outcomes"][1]["failed_stage"], "archive");
        assert!(json["outcomes"][0].get("error").is_none());
    }
}

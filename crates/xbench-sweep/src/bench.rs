//! Benchmark configure, build and run
//!
//! The benchmark project lives in the root directory and is built out of
//! tree in `build/`. Building its target also runs it, leaving the result
//! file in the build directory for the archive stage to pick up.

use crate::archive::ArchiveDir;
use crate::command::{run_checked, CommandRunner, CommandSpec};
use crate::config::SweepConfig;
use crate::error::BenchError;
use crate::types::EnvironmentHandle;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Configure the benchmark against the environment prefix and build its target
///
/// Returns the path the benchmark writes its results to. Any results file
/// left over from an earlier run is removed before configuring, so the
/// returned file can only come from this build. The file is not checked
/// here; a missing or empty result is an archive failure.
///
/// # Errors
/// - `BenchError::Io` if the build directory cannot be created or a stale
///   results file cannot be removed
/// - `BenchError::Archive` if the archive directory cannot be created
/// - `BenchError::Command` if configure or build fails
pub fn build_and_bench(
    runner: &dyn CommandRunner,
    config: &SweepConfig,
    env: &EnvironmentHandle,
) -> Result<PathBuf, BenchError> {
    let paths = config.paths();
    let bench = &config.benchmark;

    std::fs::create_dir_all(&paths.bench_build).map_err(|source| BenchError::Io {
        path: paths.bench_build.clone(),
        source,
    })?;
    ArchiveDir::new(&paths.archive).ensure()?;

    let results = paths.bench_build.join(&bench.results_file);
    match std::fs::remove_file(&results) {
        Ok(()) => tracing::debug!("removed stale {}", results.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(source) => {
            return Err(BenchError::Io {
                path: results,
                source,
            })
        }
    }

    tracing::info!("configuring benchmark against {}", env.prefix.display());
    run_checked(
        runner,
        &CommandSpec::new(&config.tools.cmake)
            .path_arg(&paths.root)
            .arg(format!("-DCMAKE_PREFIX_PATH={}", env.prefix.display()))
            .args(bench.cmake_flags.iter().cloned())
            .current_dir(&paths.bench_build),
    )?;

    tracing::info!("building and running {}", bench.target);
    run_checked(
        runner,
        &CommandSpec::new(&config.tools.make)
            .arg(&bench.target)
            .current_dir(&paths.bench_build),
    )?;

    Ok(results)
}

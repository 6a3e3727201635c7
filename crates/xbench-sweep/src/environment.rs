//! Isolated environment initialization
//!
//! Creates (or reuses) the named package-manager environment, empties the
//! archive directory and resolves the installation prefix that every
//! install step targets. Runs once per sweep.

use crate::archive::ArchiveDir;
use crate::command::{CommandRunner, CommandSpec};
use crate::config::SweepConfig;
use crate::error::EnvironmentError;
use crate::types::EnvironmentHandle;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Output of `conda env list --json`
#[derive(Debug, Deserialize)]
struct EnvList {
    #[serde(default)]
    envs: Vec<PathBuf>,
}

/// Initialize the environment and reset the archive
///
/// Safe to call repeatedly: an existing environment is reused and a
/// failed creation is only logged.
///
/// `ambient_prefix` is the prefix variable captured from the process
/// environment (the active environment), used when discovery finds nothing.
///
/// # Errors
/// - `EnvironmentError::Unresolved` if no existing prefix directory is found
/// - `EnvironmentError::Archive` if the archive cannot be reset
pub fn initialize(
    runner: &dyn CommandRunner,
    config: &SweepConfig,
    ambient_prefix: Option<&Path>,
) -> Result<EnvironmentHandle, EnvironmentError> {
    let env = &config.environment;
    let paths = config.paths();

    let listed = match list_environments(runner, &env.manager) {
        Ok(envs) => envs,
        Err(e) => {
            tracing::warn!("cannot list {} environments: {}", env.manager, e);
            Vec::new()
        }
    };
    let existing = find_named(&listed, &env.name);

    if existing.is_some() || env.prefix.is_some() {
        tracing::info!("reusing environment '{}'", env.name);
    } else {
        create_environment(runner, config, &paths.environment_file, &paths.root);
    }

    ArchiveDir::new(&paths.archive).clear()?;

    // Creation may have just added the environment.
    let created = if existing.is_none() && env.prefix.is_none() {
        list_environments(runner, &env.manager)
            .ok()
            .and_then(|envs| find_named(&envs, &env.name))
    } else {
        None
    };

    let candidates = [
        env.prefix.clone(),
        existing,
        created,
        ambient_prefix.map(Path::to_path_buf),
    ];
    let prefix = candidates
        .into_iter()
        .flatten()
        .find(|p| p.is_dir())
        .ok_or_else(|| EnvironmentError::Unresolved {
            name: env.name.clone(),
        })?;

    tracing::info!("environment '{}' prefix set to {}", env.name, prefix.display());
    Ok(EnvironmentHandle {
        name: env.name.clone(),
        prefix,
    })
}

fn create_environment(runner: &dyn CommandRunner, config: &SweepConfig, file: &Path, root: &Path) {
    let env = &config.environment;
    let spec = CommandSpec::new(&env.manager)
        .args(["env", "create", "--file"])
        .path_arg(file)
        .arg("--name")
        .arg(&env.name)
        .current_dir(root);

    match runner.run(&spec).map(|out| out.ensure_success(&spec)) {
        Ok(Ok(_)) => tracing::info!("created environment '{}'", env.name),
        Ok(Err(e)) | Err(e) => {
            tracing::warn!("environment creation failed, assuming it exists: {}", e);
        }
    }
}

/// Environment directories known to the package manager
///
/// # Errors
/// Returns `EnvironmentError::Command` if the listing command fails and
/// `EnvironmentError::InvalidEnvList` if its output is not the expected JSON.
pub fn list_environments(
    runner: &dyn CommandRunner,
    manager: &str,
) -> Result<Vec<PathBuf>, EnvironmentError> {
    let spec = CommandSpec::new(manager).args(["env", "list", "--json"]);
    let output = runner.run(&spec)?.ensure_success(&spec)?;
    let list: EnvList = serde_json::from_str(&output.stdout)?;
    Ok(list.envs)
}

fn find_named(envs: &[PathBuf], name: &str) -> Option<PathBuf> {
    envs.iter()
        .find(|p| p.file_name().is_some_and(|n| n == name))
        .cloned()
}

//! Version control checkout
//!
//! Keeps one working copy of the library under `checkouts/<library>` and
//! moves it to the requested version. Whether the clone exists is inspected
//! explicitly, so a failing clone is never mistaken for "already cloned".

use crate::command::{run_checked, CommandRunner, CommandSpec};
use crate::config::SweepConfig;
use crate::error::CheckoutError;
use crate::types::{CheckoutState, VersionId};
use std::path::Path;

/// Probe the clone directory
///
/// # Errors
/// Returns `CheckoutError::NotARepository` if the directory exists without
/// a `.git` entry.
pub fn inspect_clone(clone_dir: &Path) -> Result<CheckoutState, CheckoutError> {
    if !clone_dir.exists() {
        return Ok(CheckoutState::Absent);
    }
    if clone_dir.join(".git").exists() {
        Ok(CheckoutState::Present)
    } else {
        Err(CheckoutError::NotARepository(clone_dir.to_path_buf()))
    }
}

/// Make the working copy exist and have `version` checked out
///
/// - Absent: clone the upstream repository into the checkouts root
/// - Present: switch to the head branch and fast-forward it
///
/// Either way, finishes with `git checkout <version>`.
///
/// # Errors
/// Returns `CheckoutError::Command` for any failing git call and
/// `CheckoutError::Io` if the checkouts root cannot be created.
pub fn checkout_version(
    runner: &dyn CommandRunner,
    config: &SweepConfig,
    version: &VersionId,
) -> Result<CheckoutState, CheckoutError> {
    let paths = config.paths();
    let git = &config.tools.git;
    let library = &config.library;

    let state = inspect_clone(&paths.clone_dir)?;
    match state {
        CheckoutState::Absent => {
            std::fs::create_dir_all(&paths.checkouts).map_err(|source| CheckoutError::Io {
                path: paths.checkouts.clone(),
                source,
            })?;
            tracing::info!("cloning {} into {}", library.url, paths.clone_dir.display());
            run_checked(
                runner,
                &CommandSpec::new(git)
                    .arg("clone")
                    .arg(&library.url)
                    .arg(&library.name)
                    .current_dir(&paths.checkouts),
            )?;
        }
        CheckoutState::Present => {
            tracing::info!("updating {} in {}", library.head_ref, paths.clone_dir.display());
            run_checked(
                runner,
                &CommandSpec::new(git)
                    .arg("checkout")
                    .arg(&library.head_ref)
                    .current_dir(&paths.clone_dir),
            )?;
            run_checked(
                runner,
                &CommandSpec::new(git)
                    .args(["pull", "--ff-only"])
                    .current_dir(&paths.clone_dir),
            )?;
        }
    }

    run_checked(
        runner,
        &CommandSpec::new(git)
            .arg("checkout")
            .arg(version.as_str())
            .current_dir(&paths.clone_dir),
    )?;
    tracing::info!("checked out {}", version);
    Ok(state)
}

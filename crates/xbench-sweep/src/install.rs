//! Version install into the environment prefix
//!
//! Two strategies get the checked-out version into the prefix:
//! - `source`: configure the clone with CMake and run `make install`
//! - `package`: ask the package manager for exactly the resolved version
//!
//! Either way the installed header is read back afterwards, so a prefix
//! holding some other version is caught before any benchmark runs.

use crate::command::{run_checked, CommandRunner, CommandSpec};
use crate::config::{InstallStrategy, SweepConfig};
use crate::error::InstallError;
use crate::types::EnvironmentHandle;
use crate::version::{resolve_version, ResolvedVersion};
use std::path::PathBuf;

/// Install `version` into the environment and verify the result
///
/// # Errors
/// - `InstallError::Command` if a build or package step fails
/// - `InstallError::HeaderMissing` if no header lands in the prefix
/// - `InstallError::VersionMismatch` if the prefix holds another version
pub fn install_version(
    runner: &dyn CommandRunner,
    config: &SweepConfig,
    env: &EnvironmentHandle,
    version: &ResolvedVersion,
) -> Result<(), InstallError> {
    tracing::info!(
        "installing {} {} into {} ({})",
        config.library.name,
        version,
        env.prefix.display(),
        config.install.name()
    );

    match &config.install {
        InstallStrategy::Source => install_from_source(runner, config, env)?,
        InstallStrategy::Package { channel } => {
            install_package(runner, config, env, version, channel)?;
        }
    }

    verify_installed(config, env, version)
}

fn install_from_source(
    runner: &dyn CommandRunner,
    config: &SweepConfig,
    env: &EnvironmentHandle,
) -> Result<(), InstallError> {
    let build = config.paths().library_build;
    std::fs::create_dir_all(&build).map_err(|source| InstallError::Io {
        path: build.clone(),
        source,
    })?;

    run_checked(
        runner,
        &CommandSpec::new(&config.tools.cmake)
            .arg("..")
            .arg("-DCMAKE_INSTALL_LIBDIR=lib")
            .arg(format!("-DCMAKE_INSTALL_PREFIX={}", env.prefix.display()))
            .current_dir(&build),
    )?;
    run_checked(
        runner,
        &CommandSpec::new(&config.tools.make)
            .arg("install")
            .current_dir(&build),
    )?;
    Ok(())
}

fn install_package(
    runner: &dyn CommandRunner,
    config: &SweepConfig,
    env: &EnvironmentHandle,
    version: &ResolvedVersion,
    channel: &str,
) -> Result<(), InstallError> {
    run_checked(
        runner,
        &CommandSpec::new(&config.environment.manager)
            .args(["install", "--yes", "--prefix"])
            .path_arg(&env.prefix)
            .arg("--channel")
            .arg(channel)
            .arg(format!("{}={}", config.library.package, version)),
    )?;
    Ok(())
}

/// Header location inside an installation prefix
#[must_use]
pub fn installed_header(config: &SweepConfig, env: &EnvironmentHandle) -> PathBuf {
    env.prefix.join(&config.library.version_header)
}

fn verify_installed(
    config: &SweepConfig,
    env: &EnvironmentHandle,
    expected: &ResolvedVersion,
) -> Result<(), InstallError> {
    let header = installed_header(config, env);
    if !header.is_file() {
        return Err(InstallError::HeaderMissing(header));
    }

    let installed = resolve_version(&header, &config.library.macro_prefix)?;
    if installed != *expected {
        return Err(InstallError::VersionMismatch {
            expected: expected.to_string(),
            installed: installed.to_string(),
        });
    }
    tracing::debug!("verified {} at {}", installed, header.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, MockCommandRunner};
    use mockall::predicate::function;
    use mockall::Sequence;
    use std::path::Path;

    fn header_text(major: u32, minor: u32, patch: u32) -> String {
        format!(
            "#define XTENSOR_VERSION_MAJOR {major}\n\
             #define XTENSOR_VERSION_MINOR {minor}\n\
             #define XTENSOR_VERSION_PATCH {patch}\n"
        )
    }

    fn write_header(prefix: &Path, text: &str) {
        let header = prefix.join("include/xtensor/xtensor_config.hpp");
        std::fs::create_dir_all(header.parent().unwrap()).unwrap();
        std::fs::write(header, text).unwrap();
    }

    fn fixture() -> (tempfile::TempDir, SweepConfig, EnvironmentHandle) {
        let root = tempfile::tempdir().unwrap();
        let prefix = root.path().join("env");
        std::fs::create_dir_all(&prefix).unwrap();
        let config = SweepConfig::new().with_root(root.path());
        let env = EnvironmentHandle {
            name: "xtensor-benchmark".to_string(),
            prefix,
        };
        (root, config, env)
    }

    #[test]
    fn source_install_configures_then_installs() {
        let (_root, config, env) = fixture();
        let build = config.paths().library_build;
        let prefix_flag = format!("-DCMAKE_INSTALL_PREFIX={}", env.prefix.display());
        let install_prefix = env.prefix.clone();

        let mut runner = MockCommandRunner::new();
        let mut seq = Sequence::new();
        let cmake_cwd = build.clone();
        runner
            .expect_run()
            .with(function(move |spec: &CommandSpec| {
                spec.argv() == vec!["cmake", "..", "-DCMAKE_INSTALL_LIBDIR=lib", prefix_flag.as_str()]
                    && spec.cwd.as_deref() == Some(cmake_cwd.as_path())
            }))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::success("")));
        let make_cwd = build.clone();
        runner
            .expect_run()
            .with(function(move |spec: &CommandSpec| {
                spec.argv() == vec!["make", "install"]
                    && spec.cwd.as_deref() == Some(make_cwd.as_path())
            }))
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| {
                write_header(&install_prefix, &header_text(0, 15, 4));
                Ok(CommandOutput::success(""))
            });

        install_version(&runner, &config, &env, &ResolvedVersion::new(0, 15, 4)).unwrap();
        assert!(build.is_dir());
    }

    #[test]
    fn package_install_pins_resolved_version() {
        let (_root, config, env) = fixture();
        let config = config.with_strategy(InstallStrategy::Package {
            channel: "quantstack".to_string(),
        });
        let prefix = env.prefix.to_str().unwrap().to_string();
        let install_prefix = env.prefix.clone();

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(function(move |spec: &CommandSpec| {
                spec.argv()
                    == vec![
                        "conda",
                        "install",
                        "--yes",
                        "--prefix",
                        prefix.as_str(),
                        "--channel",
                        "quantstack",
                        "xtensor=0.14.0",
                    ]
            }))
            .times(1)
            .returning(move |_| {
                write_header(&install_prefix, &header_text(0, 14, 0));
                Ok(CommandOutput::success(""))
            });

        install_version(&runner, &config, &env, &ResolvedVersion::new(0, 14, 0)).unwrap();
        assert!(!config.paths().library_build.exists());
    }

    #[test]
    fn failing_build_step_stops_install() {
        let (_root, config, env) = fixture();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(function(|spec: &CommandSpec| spec.starts_with(&["cmake"])))
            .times(1)
            .returning(|_| Ok(CommandOutput::failure(1, "CMake Error")));
        runner
            .expect_run()
            .with(function(|spec: &CommandSpec| spec.starts_with(&["make"])))
            .never();

        let err = install_version(&runner, &config, &env, &ResolvedVersion::new(0, 15, 4))
            .unwrap_err();
        assert!(matches!(err, InstallError::Command(_)));
    }

    #[test]
    fn missing_installed_header_is_reported() {
        let (_root, config, env) = fixture();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::success("")));

        let err = install_version(&runner, &config, &env, &ResolvedVersion::new(0, 15, 4))
            .unwrap_err();
        match err {
            InstallError::HeaderMissing(path) => {
                assert_eq!(path, installed_header(&config, &env));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn stale_prefix_version_is_a_mismatch() {
        let (_root, config, env) = fixture();
        write_header(&env.prefix, &header_text(0, 14, 0));

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::success("")));

        let err = install_version(&runner, &config, &env, &ResolvedVersion::new(0, 15, 4))
            .unwrap_err();
        match err {
            InstallError::VersionMismatch {
                expected,
                installed,
            } => {
                assert_eq!(expected, "0.15.4");
                assert_eq!(installed, "0.14.0");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

//! Testing utilities for the xbench-sweep workspace
//!
//! [`FakeToolchain`] stands in for git, conda, cmake and make. It records
//! every command and reproduces the side effects the sweep depends on
//! inside a temporary directory, so whole sweeps run without any real
//! tool installed.

#![allow(missing_docs)]

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use xbench_sweep::{
    CommandError, CommandOutput, CommandRunner, CommandSpec, SweepConfig, VersionId,
};

/// Header path relative to a source tree or prefix
pub const HEADER: &str = "include/xtensor/xtensor_config.hpp";

/// Render a version header the way the library ships it
pub fn version_header(major: u32, minor: u32, patch: u32) -> String {
    format!(
        "#ifndef XTENSOR_CONFIG_HPP\n\
         #define XTENSOR_CONFIG_HPP\n\
         \n\
         #define XTENSOR_VERSION_MAJOR {major}\n\
         #define XTENSOR_VERSION_MINOR {minor}\n\
         #define XTENSOR_VERSION_PATCH {patch}\n\
         \n\
         #endif\n"
    )
}

fn write_header(base: &Path, version: (u32, u32, u32)) {
    let path = base.join(HEADER);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, version_header(version.0, version.1, version.2)).unwrap();
}

#[derive(Debug, Default)]
struct FakeState {
    log: Vec<CommandSpec>,
    checked_out: Option<String>,
    install_prefix: Option<PathBuf>,
}

/// Scripted [`CommandRunner`] simulating the sweep's external tools
#[derive(Debug)]
pub struct FakeToolchain {
    env_prefix: PathBuf,
    releases: HashMap<String, (u32, u32, u32)>,
    missing_results: HashSet<String>,
    failing: Vec<Vec<String>>,
    state: Mutex<FakeState>,
}

impl FakeToolchain {
    /// Toolchain whose environment will live at `env_prefix`
    ///
    /// Knows `master` (0.15.4) and `0.14.0` out of the box.
    pub fn new(env_prefix: impl Into<PathBuf>) -> Self {
        let releases = HashMap::from([
            ("master".to_string(), (0, 15, 4)),
            ("0.14.0".to_string(), (0, 14, 0)),
        ]);
        Self {
            env_prefix: env_prefix.into(),
            releases,
            missing_results: HashSet::new(),
            failing: Vec::new(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Make a ref checkable, reporting the given release in its header
    #[must_use]
    pub fn with_release(mut self, git_ref: &str, version: (u32, u32, u32)) -> Self {
        self.releases.insert(git_ref.to_string(), version);
        self
    }

    /// Create the environment directory up front, as if it already existed
    #[must_use]
    pub fn with_existing_environment(self) -> Self {
        std::fs::create_dir_all(&self.env_prefix).unwrap();
        self
    }

    /// Benchmark runs for this ref produce no result file
    #[must_use]
    pub fn without_results_for(mut self, git_ref: &str) -> Self {
        self.missing_results.insert(git_ref.to_string());
        self
    }

    /// Commands starting with `words` exit with code 2
    #[must_use]
    pub fn failing(mut self, words: &[&str]) -> Self {
        self.failing
            .push(words.iter().map(ToString::to_string).collect());
        self
    }

    /// Environment prefix this toolchain creates
    pub fn env_prefix(&self) -> &Path {
        &self.env_prefix
    }

    /// Every command run so far
    pub fn commands(&self) -> Vec<CommandSpec> {
        self.state.lock().log.clone()
    }

    /// Rendered command lines run so far
    pub fn command_lines(&self) -> Vec<String> {
        self.state.lock().log.iter().map(ToString::to_string).collect()
    }

    /// Number of commands starting with `words`
    pub fn count(&self, words: &[&str]) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|spec| spec.starts_with(words))
            .count()
    }

    fn simulate(&self, spec: &CommandSpec, state: &mut FakeState) -> CommandOutput {
        let argv = spec.argv();
        let cwd = spec.cwd.clone().unwrap_or_default();
        match argv.as_slice() {
            ["conda", "env", "list", "--json"] => {
                let envs: Vec<&Path> = if self.env_prefix.is_dir() {
                    vec![self.env_prefix.as_path()]
                } else {
                    Vec::new()
                };
                CommandOutput::success(serde_json::json!({ "envs": envs }).to_string())
            }
            ["conda", "env", "create", ..] => {
                if self.env_prefix.is_dir() {
                    return CommandOutput::failure(1, "CondaValueError: prefix already exists");
                }
                std::fs::create_dir_all(&self.env_prefix).unwrap();
                CommandOutput::success("")
            }
            ["conda", "install", "--yes", "--prefix", prefix, "--channel", _, pin] => {
                let Some(version) = pin.split_once('=').and_then(|(_, v)| parse_dotted(v)) else {
                    return CommandOutput::failure(1, "PackagesNotFoundError");
                };
                write_header(Path::new(prefix), version);
                CommandOutput::success("")
            }
            ["git", "clone", _, name] => {
                std::fs::create_dir_all(cwd.join(name).join(".git")).unwrap();
                CommandOutput::success("")
            }
            ["git", "checkout", git_ref] => match self.releases.get(*git_ref) {
                Some(version) => {
                    write_header(&cwd, *version);
                    state.checked_out = Some((*git_ref).to_string());
                    CommandOutput::success("")
                }
                None => CommandOutput::failure(
                    1,
                    format!("error: pathspec '{git_ref}' did not match any file(s) known to git"),
                ),
            },
            ["git", "pull", ..] => CommandOutput::success("Already up to date."),
            ["cmake", args @ ..] => {
                if let Some(prefix) = args
                    .iter()
                    .find_map(|a| a.strip_prefix("-DCMAKE_INSTALL_PREFIX="))
                {
                    state.install_prefix = Some(PathBuf::from(prefix));
                }
                CommandOutput::success("-- Configuring done")
            }
            ["make", "install"] => {
                let (Some(prefix), Some(source)) = (&state.install_prefix, cwd.parent()) else {
                    return CommandOutput::failure(2, "make: *** No rule to make target 'install'");
                };
                let installed = prefix.join(HEADER);
                std::fs::create_dir_all(installed.parent().unwrap()).unwrap();
                std::fs::copy(source.join(HEADER), installed).unwrap();
                CommandOutput::success("")
            }
            ["make", _target] => {
                let current = state.checked_out.clone().unwrap_or_default();
                if !self.missing_results.contains(&current) {
                    std::fs::write(
                        cwd.join("results.csv"),
                        format!(
                            "name,iterations,real_time,cpu_time,time_unit\n\
                             BM_xtensor_add<{current}>,1000,1.25,1.24,ns\n"
                        ),
                    )
                    .unwrap();
                }
                CommandOutput::success("")
            }
            _ => CommandOutput::failure(127, format!("{}: command not found", spec.program)),
        }
    }
}

impl CommandRunner for FakeToolchain {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let mut state = self.state.lock();
        state.log.push(spec.clone());

        let scripted_failure = self.failing.iter().any(|words| {
            let words: Vec<&str> = words.iter().map(String::as_str).collect();
            spec.starts_with(&words)
        });
        if scripted_failure {
            return Ok(CommandOutput::failure(2, "scripted failure"));
        }
        Ok(self.simulate(spec, &mut state))
    }
}

fn parse_dotted(text: &str) -> Option<(u32, u32, u32)> {
    let mut parts = text.split('.').map(str::parse::<u32>);
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch)), None) => Some((major, minor, patch)),
        _ => None,
    }
}

/// Temporary sweep root with a matching fake toolchain
#[derive(Debug)]
pub struct Sandbox {
    pub dir: tempfile::TempDir,
    pub config: SweepConfig,
    pub toolchain: FakeToolchain,
}

impl Sandbox {
    /// Default configuration rooted in a fresh temporary directory
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = SweepConfig::new().with_root(dir.path());
        let toolchain = FakeToolchain::new(dir.path().join("envs").join("xtensor-benchmark"));
        Self {
            dir,
            config,
            toolchain,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// `<root>/stats`
    pub fn archive(&self) -> PathBuf {
        self.config.paths().archive
    }

    /// Parse version ids, panicking on invalid ones
    pub fn versions(ids: &[&str]) -> Vec<VersionId> {
        ids.iter().map(|id| VersionId::new(*id).unwrap()).collect()
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

//! External command boundary
//!
//! Every tool the sweep drives (git, the package manager, cmake, make)
//! goes through [`CommandRunner`]. Calls block until the child exits;
//! there is no timeout. [`ProcessRunner`] logs child output line by line
//! as it arrives, so long builds show progress under `-v`.

use crate::error::CommandError;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fmt::{self, Display, Formatter};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Lines of stderr kept in a failure
const STDERR_TAIL_LINES: usize = 20;

/// Lines of stderr a [`ProcessRunner`] keeps in memory per command
const STDERR_CAPTURE_LINES: usize = 200;

/// A fully specified external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,
    /// Argument vector, order significant
    pub args: Vec<String>,
    /// Working directory (inherits the caller's when `None`)
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Create command for program with no arguments
    #[inline]
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    /// Append one argument
    #[inline]
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    #[inline]
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a path argument
    #[inline]
    #[must_use]
    pub fn path_arg(self, path: impl AsRef<Path>) -> Self {
        let arg = path.as_ref().display().to_string();
        self.arg(arg)
    }

    /// Run in the given directory
    #[inline]
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set an environment variable for the child
    #[inline]
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program followed by its arguments
    #[must_use]
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Whether the argument vector starts with the given words
    ///
    /// `["git", "clone"]` matches `git clone <url> <dir>`.
    #[must_use]
    pub fn starts_with(&self, words: &[&str]) -> bool {
        let argv = self.argv();
        argv.len() >= words.len() && argv.iter().zip(words).all(|(a, w)| a == w)
    }
}

impl Display for CommandSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.argv().into_iter().map(quote).collect();
        f.write_str(&rendered.join(" "))
    }
}

fn quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:+,@%".contains(c))
    {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Exit status and captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    #[must_use]
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with code zero
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into a typed failure
    ///
    /// # Errors
    /// Returns `CommandError::Failed` carrying the command line, the exit
    /// code and the tail of stderr.
    pub fn ensure_success(self, spec: &CommandSpec) -> Result<Self, CommandError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(CommandError::Failed {
            command: spec.to_string(),
            exit_code: self.exit_code,
            stderr: tail(&self.stderr, STDERR_TAIL_LINES),
        })
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Runs external commands
///
/// Implementations must block until the command has finished. A non-zero
/// exit is reported through [`CommandOutput::exit_code`], not as `Err`;
/// `Err` is reserved for commands that could not be run at all.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    /// Run the command to completion
    ///
    /// # Errors
    /// Returns `CommandError::Spawn` if the program cannot be started.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        (**self).run(spec)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for Box<R> {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        (**self).run(spec)
    }
}

/// Run a command and require a zero exit
///
/// # Errors
/// Returns the spawn failure or `CommandError::Failed`.
pub fn run_checked(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
) -> Result<CommandOutput, CommandError> {
    runner.run(spec)?.ensure_success(spec)
}

/// [`CommandRunner`] over real child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Extra variables applied to every child
    base_env: Vec<(OsString, OsString)>,
}

impl ProcessRunner {
    /// Create runner inheriting the current process environment
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable for every command this runner starts
    #[inline]
    #[must_use]
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.base_env.push((key.into(), value.into()));
        self
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        match &spec.cwd {
            Some(cwd) => tracing::info!("running `{}` in {}", spec, cwd.display()),
            None => tracing::info!("running `{}`", spec),
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(self.base_env.iter().map(|(k, v)| (k, v)));
        cmd.envs(spec.env.iter().map(|(k, v)| (k, v)));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: spec.to_string(),
            source,
        })?;

        // stderr drains on its own thread so neither pipe can fill up and stall the child
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let (stdout, stderr) = std::thread::scope(|scope| {
            let stderr_reader = scope.spawn(move || {
                let mut kept = VecDeque::with_capacity(STDERR_CAPTURE_LINES);
                if let Some(pipe) = stderr_pipe {
                    stream_lines(pipe, "stderr", |line| {
                        if kept.len() == STDERR_CAPTURE_LINES {
                            kept.pop_front();
                        }
                        kept.push_back(line);
                    });
                }
                kept
            });

            let mut stdout = String::new();
            if let Some(pipe) = stdout_pipe {
                stream_lines(pipe, "stdout", |line| {
                    stdout.push_str(&line);
                    stdout.push('\n');
                });
            }
            let stderr = Vec::from(stderr_reader.join().unwrap_or_default()).join("\n");
            (stdout, stderr)
        });

        let status = child.wait().map_err(|source| CommandError::Spawn {
            command: spec.to_string(),
            source,
        })?;
        let output = CommandOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        };

        if !output.is_success() {
            tracing::warn!("`{}` exited with {:?}", spec.program, output.exit_code);
        }

        Ok(output)
    }
}

/// Log each line of a child stream as it arrives and hand it to `keep`
fn stream_lines(pipe: impl Read, stream: &'static str, mut keep: impl FnMut(String)) {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                tracing::debug!(target: "xbench_sweep::command", stream, "{}", line);
                keep(line.to_string());
            }
            Err(e) => {
                tracing::warn!("stopped reading child {}: {}", stream, e);
                break;
            }
        }
    }
}

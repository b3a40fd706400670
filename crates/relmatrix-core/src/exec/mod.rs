//! External process execution.
//!
//! Everything the orchestrator runs (toolchain, compressors) goes through
//! [`CommandRunner`], so a run can be driven by `ScriptedRunner` in tests
//! (feature `test-util`) and by [`SystemRunner`] for real.

#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
pub mod system;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(any(test, feature = "test-util"))]
pub use scripted::{Expectation, ScriptedRunner};
pub use system::SystemRunner;

/// Why a process could not be found, started, or finished cleanly.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The executable is not on the execution path.
    #[error("\"{program}\": executable file not found in $PATH")]
    NotFound {
        /// Name that was looked up.
        program: String,
    },

    /// Spawning or waiting on the process failed.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// The process exited with a non-zero code.
    #[error("exit status {0}")]
    Status(i32),

    /// The process was killed before exiting.
    #[error("terminated by signal")]
    Signal,
}

/// A fully described process invocation.
///
/// `env: None` inherits the parent environment; `Some` replaces it entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Working directory.
    pub dir: PathBuf,
    /// Executable, by name or path.
    pub program: PathBuf,
    /// Arguments, not shell-split.
    pub args: Vec<String>,
    /// Exact environment, if any.
    pub env: Option<Vec<(String, String)>>,
}

impl CommandSpec {
    /// Run `program` in `dir` with no arguments.
    pub fn new(dir: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            program: program.into(),
            args: Vec::new(),
            env: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run with exactly these variables and nothing inherited.
    pub fn exact_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = Some(env);
        self
    }

    /// Program and arguments joined by spaces.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Exit state and combined stdout/stderr of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// Stdout followed by stderr, lossily decoded.
    pub output: String,
}

impl CommandOutput {
    /// Exited with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A process that could not be run or exited unsuccessfully.
#[derive(Debug)]
pub struct CommandFailure {
    /// What went wrong.
    pub error: ExecError,
    /// Whatever the process printed before failing. Empty if it never started.
    pub output: String,
}

/// Runs external processes on behalf of build jobs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Locate `program` on the execution path.
    fn resolve(&self, program: &str) -> Result<PathBuf, ExecError>;

    /// Run to completion and capture combined output.
    ///
    /// A non-zero exit is not an error at this level; see [`run_checked`].
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError>;
}

/// Run `spec`, turning spawn failures and non-zero exits into a [`CommandFailure`].
pub async fn run_checked(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
) -> Result<String, CommandFailure> {
    let out = runner.run(spec).await.map_err(|error| CommandFailure {
        error,
        output: String::new(),
    })?;

    match out.code {
        Some(0) => Ok(out.output),
        Some(code) => Err(CommandFailure {
            error: ExecError::Status(code),
            output: out.output,
        }),
        None => Err(CommandFailure {
            error: ExecError::Signal,
            output: out.output,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let spec = CommandSpec::new("/src", "/usr/bin/go")
            .arg("build")
            .args(["-o", "/src/app"]);
        assert_eq!(spec.command_line(), "/usr/bin/go build -o /src/app");
        assert_eq!(spec.env, None);
    }

    #[test]
    fn test_exec_error_messages() {
        assert_eq!(ExecError::Status(2).to_string(), "exit status 2");
        assert_eq!(
            ExecError::NotFound {
                program: "zip".into()
            }
            .to_string(),
            "\"zip\": executable file not found in $PATH"
        );
    }

    #[tokio::test]
    async fn test_run_checked_maps_exit_status() {
        let runner = ScriptedRunner::new().expect(Expectation::new("/src", "false").fails(
            "nope",
            3,
        ));
        let failure = run_checked(&runner, &CommandSpec::new("/src", "false"))
            .await
            .unwrap_err();
        assert_eq!(failure.error.to_string(), "exit status 3");
        assert_eq!(failure.output, "nope");
        assert!(runner.remaining().is_empty());
    }

    #[tokio::test]
    async fn test_run_checked_spawn_failure_has_no_output() {
        let runner = ScriptedRunner::new();
        let failure = run_checked(&runner, &CommandSpec::new("/src", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ExecError::Io(_)));
        assert!(failure.output.is_empty());
        assert_eq!(runner.unexpected(), ["missing"]);
    }
}

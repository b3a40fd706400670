//! A deterministic [`CommandRunner`] for tests.
//!
//! Commands are matched against a list of expectations in any order, which
//! suits the orchestrator's unordered parallel jobs. Each expectation is
//! consumed by the first command that matches it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CommandOutput, CommandRunner, CommandSpec, ExecError};

/// One command the runner is prepared to answer.
#[derive(Debug, Clone)]
pub struct Expectation {
    dir: PathBuf,
    command_line: String,
    env: Option<Vec<(String, String)>>,
    output: String,
    code: i32,
    creates: Option<PathBuf>,
}

impl Expectation {
    /// Expect `command_line` (program and args joined by spaces) run in `dir`.
    /// Succeeds with no output unless configured otherwise.
    pub fn new(dir: impl Into<PathBuf>, command_line: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            command_line: command_line.into(),
            env: None,
            output: String::new(),
            code: 0,
            creates: None,
        }
    }

    /// Only match when the command carries exactly this environment.
    pub fn with_env<I, K, V>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(
            env.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Print `output` and exit 0.
    pub fn outputs(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    /// Print `output` and exit with `code`.
    pub fn fails(mut self, output: impl Into<String>, code: i32) -> Self {
        self.output = output.into();
        self.code = code;
        self
    }

    /// Write a placeholder file at `path` when the command runs, the way a
    /// real build or compressor would leave its product behind.
    pub fn creates(mut self, path: impl Into<PathBuf>) -> Self {
        self.creates = Some(path.into());
        self
    }

    fn matches(&self, spec: &CommandSpec) -> bool {
        self.dir == spec.dir
            && self.command_line == spec.command_line()
            && self.env.as_ref().is_none_or(|env| Some(env) == spec.env.as_ref())
    }
}

#[derive(Debug, Default)]
struct State {
    expected: Vec<Expectation>,
    unexpected: Vec<String>,
    calls: Vec<String>,
}

/// Any-order scripted command runner.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    executables: HashMap<String, PathBuf>,
    state: Mutex<State>,
}

impl ScriptedRunner {
    /// A runner that knows no executables and expects no commands.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` resolvable to `path`.
    pub fn with_executable(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.executables.insert(name.into(), path.into());
        self
    }

    /// Add one expectation.
    pub fn expect(self, expectation: Expectation) -> Self {
        self.lock().expected.push(expectation);
        self
    }

    /// Add several expectations.
    pub fn expect_all(self, expectations: impl IntoIterator<Item = Expectation>) -> Self {
        self.lock().expected.extend(expectations);
        self
    }

    /// Command lines of expectations that were never matched.
    pub fn remaining(&self) -> Vec<String> {
        self.lock()
            .expected
            .iter()
            .map(|e| e.command_line.clone())
            .collect()
    }

    /// Command lines that matched no expectation.
    pub fn unexpected(&self) -> Vec<String> {
        self.lock().unexpected.clone()
    }

    /// Every command line run, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn resolve(&self, program: &str) -> Result<PathBuf, ExecError> {
        self.executables
            .get(program)
            .cloned()
            .ok_or_else(|| ExecError::NotFound {
                program: program.to_string(),
            })
    }

    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        let line = spec.command_line();
        let matched = {
            let mut state = self.lock();
            state.calls.push(line.clone());
            match state.expected.iter().position(|e| e.matches(spec)) {
                Some(idx) => state.expected.remove(idx),
                None => {
                    state.unexpected.push(line.clone());
                    return Err(ExecError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("unexpected command: {line}"),
                    )));
                }
            }
        };

        if let Some(path) = &matched.creates {
            tokio::fs::write(path, b"binary").await?;
        }

        Ok(CommandOutput {
            code: Some(matched.code),
            output: matched.output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_matches_in_any_order() {
        let runner = ScriptedRunner::new()
            .expect(Expectation::new("/w", "go version").outputs("go version go1.8"))
            .expect(Expectation::new("/w", "go build -o out").with_env([("GOOS", "linux")]));

        let build = CommandSpec::new("/w", "go")
            .args(["build", "-o", "out"])
            .exact_env(vec![("GOOS".into(), "linux".into())]);
        assert!(runner.run(&build).await.unwrap().success());

        let version = runner
            .run(&CommandSpec::new("/w", "go").arg("version"))
            .await
            .unwrap();
        assert_eq!(version.output, "go version go1.8");

        assert!(runner.remaining().is_empty());
        assert!(runner.unexpected().is_empty());
        assert_eq!(runner.calls(), ["go build -o out", "go version"]);
    }

    #[tokio::test]
    async fn test_env_mismatch_is_unexpected() {
        let runner = ScriptedRunner::new()
            .expect(Expectation::new("/w", "go build").with_env([("GOOS", "linux")]));

        let wrong = CommandSpec::new("/w", "go")
            .arg("build")
            .exact_env(vec![("GOOS".into(), "darwin".into())]);
        assert!(runner.run(&wrong).await.is_err());
        assert_eq!(runner.unexpected(), ["go build"]);
        assert_eq!(runner.remaining(), ["go build"]);
    }

    #[tokio::test]
    async fn test_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let product = dir.path().join("app");
        let runner = ScriptedRunner::new()
            .expect(Expectation::new(dir.path(), "touch").creates(&product));

        runner
            .run(&CommandSpec::new(dir.path(), "touch"))
            .await
            .unwrap();
        assert!(product.exists());
    }

    #[test]
    fn test_resolve_known_executables_only() {
        let runner = ScriptedRunner::new().with_executable("go", "/usr/local/go/bin/go");
        assert_eq!(
            runner.resolve("go").unwrap(),
            PathBuf::from("/usr/local/go/bin/go")
        );
        assert!(matches!(
            runner.resolve("zip"),
            Err(ExecError::NotFound { .. })
        ));
    }
}

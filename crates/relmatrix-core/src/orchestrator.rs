//! Build-matrix orchestration.
//!
//! One task per matrix cell builds the binary, then compresses it. Every
//! artifact that ends up on disk is sent over a bounded channel to a single
//! consumer (the uploader). The channel closes only after every job has
//! terminated, so the end of the stream means the run is finished.
//!
//! ## Failure isolation
//!
//! | Condition | Reported | Emitted |
//! |---|---|---|
//! | Build exits non-zero / cannot start | error | nothing |
//! | Compressor not on `PATH` | warning | uncompressed binary |
//! | Compressor exits non-zero | error | uncompressed binary |
//! | Compressor succeeds | - | archive (binary removed) |
//!
//! The only fatal condition is a missing toolchain, detected before any job
//! starts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;

use crate::exec::{self, CommandRunner, CommandSpec, ExecError};
use crate::matrix::{Cell, Matrix};
use crate::reporter::Reporter;

/// Placeholder embedded in artifact names when the toolchain version cannot be parsed.
pub const UNKNOWN_VERSION: &str = "UNKNOWN";

/// Artifacts buffered between the build jobs and the uploader.
const STREAM_CAPACITY: usize = 10;

/// How to drive a toolchain for cross compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toolchain {
    /// Executable name, resolved on `PATH`.
    pub program: &'static str,
    /// Variable selecting the target operating system.
    pub os_var: &'static str,
    /// Variable selecting the target architecture.
    pub arch_var: &'static str,
    /// Variable forwarded unchanged from the host environment.
    pub module_path_var: &'static str,
}

/// The Go toolchain.
pub const GO: Toolchain = Toolchain {
    program: "go",
    os_var: "GOOS",
    arch_var: "GOARCH",
    module_path_var: "GOPATH",
};

/// Conditions that abort a run before any job starts.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The toolchain is not on the execution path.
    #[error("Could not find the {program} toolchain: {source}")]
    ToolchainNotFound {
        /// Executable that was looked up.
        program: &'static str,
        /// Lookup failure.
        #[source]
        source: ExecError,
    },
}

/// A built binary or archive on disk.
///
/// Whoever receives it from the stream owns the file and is responsible for
/// removing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    path: PathBuf,
}

impl Artifact {
    /// Wrap a path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base file name, used as the asset name on upload.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Artifacts in completion order. Ends once every job has finished.
pub type ArtifactStream = ReceiverStream<Artifact>;

/// `{project}-{os}-{arch}-{version}-{tag}{extension}`
pub fn artifact_name(project: &str, cell: Cell, version: &str, tag: &str) -> String {
    format!(
        "{project}-{}-{}-{version}-{tag}{}",
        cell.os(),
        cell.arch,
        cell.target.extension
    )
}

/// Third word of `go version` output (`go version go1.8 linux/amd64`).
pub fn parse_version(output: &str) -> String {
    output
        .split_whitespace()
        .nth(2)
        .map_or_else(|| UNKNOWN_VERSION.to_string(), str::to_string)
}

/// Fans build jobs out over a [`Matrix`].
#[derive(Clone)]
pub struct Orchestrator {
    runner: Arc<dyn CommandRunner>,
    reporter: Arc<dyn Reporter>,
    matrix: Matrix,
    toolchain: Toolchain,
    toolchain_path: PathBuf,
    module_path: String,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("matrix", &self.matrix)
            .field("toolchain", &self.toolchain)
            .field("toolchain_path", &self.toolchain_path)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Resolve the toolchain and prepare to build `matrix`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ToolchainNotFound`] if the toolchain is not on
    /// the execution path. Nothing has been run at that point.
    pub fn locate(
        runner: Arc<dyn CommandRunner>,
        reporter: Arc<dyn Reporter>,
        matrix: Matrix,
    ) -> Result<Self, BuildError> {
        let toolchain = GO;
        let toolchain_path =
            runner
                .resolve(toolchain.program)
                .map_err(|source| BuildError::ToolchainNotFound {
                    program: toolchain.program,
                    source,
                })?;
        tracing::debug!("using toolchain at {}", toolchain_path.display());

        Ok(Self {
            runner,
            reporter,
            matrix,
            toolchain,
            toolchain_path,
            module_path: std::env::var(toolchain.module_path_var).unwrap_or_default(),
        })
    }

    /// Forward `module_path` instead of the host's value.
    pub fn with_module_path(mut self, module_path: impl Into<String>) -> Self {
        self.module_path = module_path.into();
        self
    }

    /// Cells this orchestrator builds.
    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    /// Start one job per matrix cell and return the stream of their artifacts.
    ///
    /// Must be called from within a Tokio runtime. All jobs start
    /// immediately; the stream yields artifacts in completion order.
    pub fn build_all(&self, working_dir: &Path, project: &str, tag: &str) -> ArtifactStream {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let ctx = Arc::new(JobContext {
            runner: Arc::clone(&self.runner),
            reporter: Arc::clone(&self.reporter),
            toolchain: self.toolchain,
            toolchain_path: self.toolchain_path.clone(),
            module_path: self.module_path.clone(),
            working_dir: working_dir.to_path_buf(),
            project: project.to_string(),
            tag: tag.to_string(),
        });

        let mut jobs = JoinSet::new();
        for cell in self.matrix.cells() {
            let ctx = Arc::clone(&ctx);
            let tx = tx.clone();
            jobs.spawn(async move { ctx.run(cell, &tx).await });
        }
        tracing::info!("started {} build jobs", jobs.len());

        let reporter = Arc::clone(&self.reporter);
        tokio::spawn(async move {
            while let Some(res) = jobs.join_next().await {
                if let Err(e) = res {
                    reporter.error(&format!("Build job did not complete: {e}"));
                }
            }
            // Jobs each held a clone; dropping the last sender closes the stream.
            drop(tx);
            tracing::debug!("all build jobs finished");
        });

        ReceiverStream::new(rx)
    }
}

/// Locate the toolchain for `matrix` and start building it.
///
/// # Errors
///
/// See [`Orchestrator::locate`].
pub fn build_all(
    runner: Arc<dyn CommandRunner>,
    reporter: Arc<dyn Reporter>,
    matrix: Matrix,
    working_dir: &Path,
    project: &str,
    tag: &str,
) -> Result<ArtifactStream, BuildError> {
    Ok(Orchestrator::locate(runner, reporter, matrix)?.build_all(working_dir, project, tag))
}

/// State shared read-only by every job of one run.
struct JobContext {
    runner: Arc<dyn CommandRunner>,
    reporter: Arc<dyn Reporter>,
    toolchain: Toolchain,
    toolchain_path: PathBuf,
    module_path: String,
    working_dir: PathBuf,
    project: String,
    tag: String,
}

impl JobContext {
    async fn run(&self, cell: Cell, tx: &mpsc::Sender<Artifact>) {
        let version = self.version().await;
        let binary = self
            .working_dir
            .join(artifact_name(&self.project, cell, &version, &self.tag));
        let binary_arg = binary.to_string_lossy().into_owned();

        let build = CommandSpec::new(&self.working_dir, &self.toolchain_path)
            .args(["build", "-o", binary_arg.as_str()])
            .exact_env(self.build_env(cell));

        tracing::debug!(%cell, "building {binary_arg}");
        if let Err(failure) = exec::run_checked(self.runner.as_ref(), &build).await {
            self.reporter.error(&format!(
                "Could not run build for {cell}: {}\nOutput: {}",
                failure.error, failure.output
            ));
            return;
        }

        let artifact = self.compress(cell, binary, &binary_arg).await;
        tracing::debug!(%cell, "produced {artifact}");
        if tx.send(artifact).await.is_err() {
            tracing::warn!(%cell, "artifact stream closed before the build finished");
        }
    }

    /// Best effort; any failure yields [`UNKNOWN_VERSION`].
    async fn version(&self) -> String {
        let spec = CommandSpec::new(&self.working_dir, &self.toolchain_path).arg("version");
        match self.runner.run(&spec).await {
            Ok(out) => parse_version(&out.output),
            Err(e) => {
                tracing::debug!("toolchain version query failed: {e}");
                UNKNOWN_VERSION.to_string()
            }
        }
    }

    /// A fresh list per job; jobs never share or mutate each other's environment.
    fn build_env(&self, cell: Cell) -> Vec<(String, String)> {
        vec![
            (self.toolchain.os_var.to_string(), cell.os().to_string()),
            (self.toolchain.arch_var.to_string(), cell.arch.to_string()),
            (
                self.toolchain.module_path_var.to_string(),
                self.module_path.clone(),
            ),
        ]
    }

    async fn compress(&self, cell: Cell, binary: PathBuf, binary_arg: &str) -> Artifact {
        let target = cell.target;
        if let Err(e) = self.runner.resolve(target.compress_binary) {
            self.reporter
                .warning(&format!("Could not compress binary for {cell}: {e}"));
            return Artifact::new(binary);
        }

        let archive = format!("{binary_arg}{}", target.compress_extension);
        let spec = CommandSpec::new(&self.working_dir, target.compress_binary)
            .args(target.compress_args(binary_arg, &archive));

        match exec::run_checked(self.runner.as_ref(), &spec).await {
            Ok(_) => {
                // gzip already removed it; zip did not.
                if let Err(e) = tokio::fs::remove_file(&binary).await {
                    tracing::debug!("not removing {}: {e}", binary.display());
                }
                Artifact::new(archive)
            }
            Err(failure) => {
                self.reporter.error(&format!(
                    "Could not compress binary for {cell}: {}\nOutput: {}",
                    failure.error, failure.output
                ));
                Artifact::new(binary)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{Expectation, ScriptedRunner};
    use crate::matrix::BuildTarget;
    use crate::reporter::{MemoryReporter, NullReporter};
    use futures::StreamExt;
    use std::collections::BTreeSet;

    const GO_PATH: &str = "/usr/local/go/bin/go";

    static SMALL: &[BuildTarget] = &[
        BuildTarget {
            operating_system: "linux",
            architectures: &["386", "amd64"],
            compress_binary: "gzip",
            include_target_parameter: false,
            compress_extension: ".gz",
            extension: "",
        },
        BuildTarget {
            operating_system: "windows",
            architectures: &["amd64"],
            compress_binary: "zip",
            include_target_parameter: true,
            compress_extension: ".zip",
            extension: ".exe",
        },
    ];

    static LINUX_386: &[BuildTarget] = &[BuildTarget {
        operating_system: "linux",
        architectures: &["386"],
        compress_binary: "gzip",
        include_target_parameter: false,
        compress_extension: ".gz",
        extension: "",
    }];

    fn runner() -> ScriptedRunner {
        ScriptedRunner::new()
            .with_executable("go", GO_PATH)
            .with_executable("gzip", "/bin/gzip")
            .with_executable("zip", "/usr/bin/zip")
    }

    fn binary(dir: &Path, cell: Cell) -> String {
        dir.join(artifact_name("app", cell, "go1.8", "v1.0.0"))
            .to_string_lossy()
            .into_owned()
    }

    fn version(dir: &Path) -> Expectation {
        Expectation::new(dir, format!("{GO_PATH} version")).outputs("go version go1.8 linux/amd64\n")
    }

    fn build(dir: &Path, cell: Cell) -> Expectation {
        let bin = binary(dir, cell);
        Expectation::new(dir, format!("{GO_PATH} build -o {bin}"))
            .with_env([
                ("GOOS", cell.os()),
                ("GOARCH", cell.arch),
                ("GOPATH", "/go"),
            ])
            .creates(bin)
    }

    fn compress(dir: &Path, cell: Cell) -> Expectation {
        let bin = binary(dir, cell);
        let archive = format!("{bin}{}", cell.target.compress_extension);
        let line = if cell.target.include_target_parameter {
            format!("{} {archive} {bin}", cell.target.compress_binary)
        } else {
            format!("{} {bin}", cell.target.compress_binary)
        };
        Expectation::new(dir, line).creates(archive)
    }

    fn cells() -> Vec<Cell> {
        Matrix::from_targets(SMALL).cells().collect()
    }

    async fn run(
        runner: ScriptedRunner,
        reporter: Arc<MemoryReporter>,
        dir: &Path,
    ) -> (Arc<ScriptedRunner>, BTreeSet<String>) {
        let runner = Arc::new(runner);
        let stream = Orchestrator::locate(runner.clone(), reporter, Matrix::from_targets(SMALL))
            .unwrap()
            .with_module_path("/go")
            .build_all(dir, "app", "v1.0.0");
        let names: BTreeSet<String> = stream.map(|a| a.file_name()).collect().await;
        (runner, names)
    }

    #[test]
    fn test_artifact_name() {
        let linux = Matrix::default()
            .cells()
            .find(|c| c.os() == "linux" && c.arch == "amd64")
            .unwrap();
        assert_eq!(
            artifact_name("app", linux, "go1.8", "v1.0.0"),
            "app-linux-amd64-go1.8-v1.0.0"
        );

        let windows = Matrix::default()
            .cells()
            .find(|c| c.os() == "windows")
            .unwrap();
        assert_eq!(
            artifact_name("app", windows, "go1.8", "v1.0.0"),
            "app-windows-386-go1.8-v1.0.0.exe"
        );
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("go version go1.8 linux/amd64\n"), "go1.8");
        assert_eq!(parse_version("go version go1.8"), "go1.8");
        assert_eq!(parse_version("command not found"), UNKNOWN_VERSION);
        assert_eq!(parse_version(""), UNKNOWN_VERSION);
    }

    #[tokio::test]
    async fn test_toolchain_not_found() {
        let runner = Arc::new(ScriptedRunner::new());
        let err = Orchestrator::locate(runner.clone(), Arc::new(NullReporter), Matrix::default())
            .unwrap_err();
        assert!(err.to_string().starts_with("Could not find the go toolchain"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_all_cells_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let script = runner().expect_all(
            cells()
                .into_iter()
                .flat_map(|c| [version(d), build(d, c), compress(d, c)]),
        );
        let reporter = Arc::new(MemoryReporter::new());

        let (runner, names) = run(script, reporter.clone(), d).await;

        let expected: BTreeSet<String> = [
            "app-linux-386-go1.8-v1.0.0.gz",
            "app-linux-amd64-go1.8-v1.0.0.gz",
            "app-windows-amd64-go1.8-v1.0.0.exe.zip",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(names, expected);
        assert!(runner.remaining().is_empty());
        assert!(runner.unexpected().is_empty());
        assert_eq!(reporter.diagnostics(), "");

        // Originals are removed once compressed.
        for cell in cells() {
            assert!(!Path::new(&binary(d, cell)).exists());
        }
    }

    #[tokio::test]
    async fn test_build_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let cells = cells();
        let failing = cells[0];
        let bin = binary(d, failing);

        let mut script = runner().expect(version(d)).expect(
            Expectation::new(d, format!("{GO_PATH} build -o {bin}")).fails("Build error", 2),
        );
        for &c in &cells[1..] {
            script = script.expect_all([version(d), build(d, c), compress(d, c)]);
        }
        let reporter = Arc::new(MemoryReporter::new());

        let (runner, names) = run(script, reporter.clone(), d).await;

        assert_eq!(names.len(), 2);
        assert!(!names.iter().any(|n| n.contains("linux-386")));
        assert_eq!(
            reporter.diagnostics(),
            "Could not run build for linux/386: exit status 2\nOutput: Build error\n"
        );
        assert!(runner.remaining().is_empty());
    }

    #[tokio::test]
    async fn test_compress_failure_emits_uncompressed() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let cells = cells();
        let failing = cells[0];
        let bin = binary(d, failing);

        let mut script = runner().expect_all([
            version(d),
            build(d, failing),
            Expectation::new(d, format!("gzip {bin}")).fails("gzip: disk full", 1),
        ]);
        for &c in &cells[1..] {
            script = script.expect_all([version(d), build(d, c), compress(d, c)]);
        }
        let reporter = Arc::new(MemoryReporter::new());

        let (_, names) = run(script, reporter.clone(), d).await;

        assert_eq!(names.len(), 3);
        assert!(names.contains("app-linux-386-go1.8-v1.0.0"));
        assert!(Path::new(&bin).exists());
        assert_eq!(
            reporter.diagnostics(),
            "Could not compress binary for linux/386: exit status 1\nOutput: gzip: disk full\n"
        );
    }

    #[tokio::test]
    async fn test_missing_compressor_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let script = ScriptedRunner::new()
            .with_executable("go", GO_PATH)
            .with_executable("gzip", "/bin/gzip")
            .expect_all(cells().into_iter().flat_map(|c| {
                if c.os() == "windows" {
                    vec![version(d), build(d, c)]
                } else {
                    vec![version(d), build(d, c), compress(d, c)]
                }
            }));
        let reporter = Arc::new(MemoryReporter::new());

        let (runner, names) = run(script, reporter.clone(), d).await;

        assert!(names.contains("app-windows-amd64-go1.8-v1.0.0.exe"));
        assert!(runner.remaining().is_empty());
        assert!(runner.unexpected().is_empty());
        assert!(!runner.calls().iter().any(|c| c.starts_with("zip ")));
        assert_eq!(
            reporter.diagnostics(),
            "Could not compress binary for windows/amd64: \"zip\": executable file not found in $PATH\n"
        );
    }

    #[tokio::test]
    async fn test_unparseable_version_uses_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let cell = cells()[0];
        let bin = d
            .join(artifact_name("app", cell, UNKNOWN_VERSION, "v1.0.0"))
            .to_string_lossy()
            .into_owned();

        let runner = Arc::new(runner().expect_all([
            Expectation::new(d, format!("{GO_PATH} version")).fails("", 127),
            Expectation::new(d, format!("{GO_PATH} build -o {bin}")).creates(&bin),
            Expectation::new(d, format!("gzip {bin}")).creates(format!("{bin}.gz")),
        ]));

        let artifacts: Vec<Artifact> = build_all(
            runner.clone(),
            Arc::new(NullReporter),
            Matrix::from_targets(LINUX_386),
            d,
            "app",
            "v1.0.0",
        )
        .unwrap()
        .collect()
        .await;

        assert_eq!(artifacts.len(), 1);
        assert_eq!(
            artifacts[0].file_name(),
            "app-linux-386-UNKNOWN-v1.0.0.gz"
        );
        assert!(runner.remaining().is_empty());
    }

    #[tokio::test]
    async fn test_stream_closes_after_all_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let script = runner().expect_all(
            cells()
                .into_iter()
                .flat_map(|c| [version(d), build(d, c), compress(d, c)]),
        );
        let runner = Arc::new(script);
        let mut stream = Orchestrator::locate(
            runner.clone(),
            Arc::new(NullReporter),
            Matrix::from_targets(SMALL),
        )
        .unwrap()
        .with_module_path("/go")
        .build_all(d, "app", "v1.0.0");

        let mut seen = 0;
        while stream.next().await.is_some() {
            seen += 1;
        }
        assert_eq!(seen, 3);
        // Every command had run by the time the stream ended.
        assert_eq!(runner.calls().len(), 9);
    }
}

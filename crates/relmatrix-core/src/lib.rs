//! relmatrix core
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Builds a project for every cell of a static (operating system,
//! architecture) matrix, compresses each binary, and publishes the results
//! as assets of a GitHub release.
//!
//! # Architecture
//!
//! - [`orchestrator`]: the build-matrix orchestrator. One task per matrix cell,
//!   artifacts fanned in over a bounded channel that closes only after every
//!   job has finished.
//! - [`release`]: find-or-create the release for a tag, flipping draft to
//!   published on request.
//! - [`assets`]: clear old release assets and drain the artifact stream into
//!   uploads, one at a time.
//! - [`exec`] and [`github`]: the two substitution seams, external processes
//!   ([`exec::SystemRunner`], with `exec::ScriptedRunner` for tests) and the
//!   remote API ([`GithubClient`]).
//! - [`pipeline`]: wires everything together in the order the CLI runs it.

pub mod assets;
pub mod exec;
pub mod github;
pub mod matrix;
pub mod orchestrator;
pub mod pipeline;
pub mod release;
pub mod reporter;

pub use assets::UploadSummary;
pub use exec::{CommandRunner, SystemRunner};
pub use github::{ApiError, GithubClient, ReleaseApi, RepoRef};
pub use matrix::{BuildTarget, Cell, Matrix};
pub use orchestrator::{Artifact, ArtifactStream, BuildError, Orchestrator};
pub use pipeline::{ReleaseConfig, ReleaseError};
#[cfg(any(test, feature = "test-util"))]
pub use reporter::MemoryReporter;
pub use reporter::{NullReporter, Reporter, StderrReporter};

/// User Agent string for API requests
pub const USER_AGENT: &str = concat!("relmatrix/", env!("CARGO_PKG_VERSION"));

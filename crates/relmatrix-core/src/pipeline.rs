//! The full release run.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::assets::{self, UploadSummary};
use crate::exec::CommandRunner;
use crate::github::{ApiError, ReleaseApi, RepoRef};
use crate::matrix::{Matrix, MatrixError};
use crate::orchestrator::{BuildError, Orchestrator};
use crate::release;
use crate::reporter::Reporter;

/// What to build and where to publish it.
#[derive(Debug, Clone)]
pub struct ReleaseConfig {
    /// Target repository.
    pub repo: RepoRef,
    /// Tag the release is attached to; also embedded in artifact names.
    pub tag: String,
    /// Project name, the first component of artifact names.
    pub project: String,
    /// Directory the toolchain builds in.
    pub source_dir: PathBuf,
    /// Publish the release (create it published, or publish a draft).
    pub publish: bool,
    /// Delete existing assets before uploading.
    pub remove_old_assets: bool,
    /// Restrict the matrix to these operating systems. Empty means all.
    pub operating_systems: Vec<String>,
}

/// A run-aborting failure. Messages pass through unchanged.
#[derive(Error, Debug)]
pub enum ReleaseError {
    /// Bad OS filter.
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    /// Toolchain missing.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// Release resolution or asset cleanup failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Build every selected cell and publish the artifacts.
///
/// The OS filter and toolchain are checked before any network call. Builds
/// start once the release is resolved; old assets (if requested) are
/// cleared while they run. Per-cell build and upload failures are reported
/// through `reporter` and counted in the summary, not returned.
///
/// # Errors
///
/// See [`ReleaseError`].
pub async fn run(
    config: &ReleaseConfig,
    api: &dyn ReleaseApi,
    runner: Arc<dyn CommandRunner>,
    reporter: Arc<dyn Reporter>,
) -> Result<UploadSummary, ReleaseError> {
    let matrix = Matrix::default().only(&config.operating_systems)?;
    let orchestrator = Orchestrator::locate(runner, Arc::clone(&reporter), matrix)?;

    let release =
        release::resolve_release(api, &config.repo, &config.tag, config.publish).await?;
    tracing::info!(id = release.id, draft = release.draft, "release {} resolved", config.tag);

    let artifacts = orchestrator.build_all(&config.source_dir, &config.project, &config.tag);

    if config.remove_old_assets {
        assets::clear_assets(api, &config.repo, release.id).await?;
    }

    let summary = assets::upload_all(
        api,
        &config.repo,
        release.id,
        artifacts,
        &*reporter,
    )
    .await;
    tracing::info!(
        uploaded = summary.uploaded,
        failed = summary.failed,
        "upload finished"
    );
    Ok(summary)
}

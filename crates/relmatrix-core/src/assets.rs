//! Release asset lifecycle: clearing what a previous run uploaded and
//! draining the artifact stream into uploads.

use futures::StreamExt;
use futures::stream::Stream;

use crate::github::{self, ApiError, ReleaseApi, RepoRef};
use crate::orchestrator::Artifact;
use crate::reporter::Reporter;

/// Outcome of [`upload_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Artifacts attached to the release.
    pub uploaded: usize,
    /// Artifacts that failed to upload and were left on disk.
    pub failed: usize,
}

/// Delete every asset currently attached to the release.
///
/// All pages are listed before anything is deleted.
///
/// # Errors
///
/// The first listing or delete failure is returned and the remaining
/// deletes are not attempted.
pub async fn clear_assets(
    api: &dyn ReleaseApi,
    repo: &RepoRef,
    release_id: u64,
) -> Result<usize, ApiError> {
    let assets = github::all_assets(api, repo, release_id).await?;
    tracing::info!("removing {} old assets from release {release_id}", assets.len());

    for asset in &assets {
        tracing::debug!(id = asset.id, "deleting asset {}", asset.name);
        api.delete_asset(repo, asset.id).await?;
    }
    Ok(assets.len())
}

/// Upload every artifact the stream yields, one at a time in arrival order,
/// until the stream ends.
///
/// A successful upload removes the local file. A failed upload is reported
/// and the file is kept. Neither stops the loop.
pub async fn upload_all<S>(
    api: &dyn ReleaseApi,
    repo: &RepoRef,
    release_id: u64,
    artifacts: S,
    reporter: &dyn Reporter,
) -> UploadSummary
where
    S: Stream<Item = Artifact>,
{
    let mut summary = UploadSummary::default();
    let mut artifacts = std::pin::pin!(artifacts);

    while let Some(artifact) = artifacts.next().await {
        let name = artifact.file_name();
        tracing::debug!("uploading {artifact}");

        if let Err(e) = api
            .upload_asset(repo, release_id, &name, artifact.path())
            .await
        {
            reporter.error(&format!("Unable to upload binary {artifact}: {e}"));
            summary.failed += 1;
            continue;
        }

        summary.uploaded += 1;
        reporter.success(&format!("Uploaded {name}"));
        if let Err(e) = tokio::fs::remove_file(artifact.path()).await {
            reporter.error(&format!("Unable to cleanup binary {artifact}: {e}"));
        }
    }

    summary
}

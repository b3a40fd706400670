//! Release reconciliation.
//!
//! Finds the release for a tag, creating it when absent, and publishes a
//! draft when asked to. Publishing is one-way: a published release is never
//! turned back into a draft.

use crate::github::{self, ApiError, NewRelease, Release, ReleaseApi, ReleasePatch, RepoRef};

/// Resolve the release for `tag` in `repo`.
///
/// Lists every release (all pages). If more than one carries `tag`, the first
/// in listing order is used. A matching draft is published when `publish` is
/// set; otherwise the match is returned untouched. Without a match a release
/// is created with `draft = !publish`.
///
/// # Errors
///
/// Any API failure while listing, editing or creating is returned unchanged.
pub async fn resolve_release(
    api: &dyn ReleaseApi,
    repo: &RepoRef,
    tag: &str,
    publish: bool,
) -> Result<Release, ApiError> {
    let releases = github::all_releases(api, repo).await?;
    tracing::debug!("{repo} has {} releases", releases.len());

    let Some(existing) = releases.into_iter().find(|r| r.tag_name == tag) else {
        tracing::info!(publish, "creating release {tag} in {repo}");
        return api
            .create_release(
                repo,
                &NewRelease {
                    tag_name: tag.to_string(),
                    draft: !publish,
                },
            )
            .await;
    };

    if existing.draft && publish {
        tracing::info!(id = existing.id, "publishing draft release {tag}");
        let edited = api
            .edit_release(repo, existing.id, &ReleasePatch { draft: false })
            .await?;
        return Ok(Release {
            id: existing.id,
            ..edited
        });
    }

    tracing::debug!(id = existing.id, "reusing release {tag}");
    Ok(existing)
}

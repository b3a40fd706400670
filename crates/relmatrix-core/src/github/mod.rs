//! Remote release API.
//!
//! [`ReleaseApi`] is the seam between the release logic and GitHub's REST
//! API; [`GithubClient`] is the implementation used in production. List
//! endpoints are paginated; [`collect_pages`] follows them to the end.

mod client;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::{DEFAULT_API_URL, DEFAULT_UPLOAD_URL, GithubClient, PER_PAGE, next_page};

/// Any failure talking to the remote API. Always fatal for the operation
/// that raised it.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The server answered with a non-success status.
    #[error("{method} {url}: {status} {message}")]
    Status {
        /// HTTP method of the failed request.
        method: String,
        /// Full request URL, including the query.
        url: String,
        /// HTTP status code.
        status: u16,
        /// GitHub's `message`, or the status's canonical reason.
        message: String,
    },

    /// Transport or decoding failure.
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    /// A base URL or endpoint could not be parsed.
    #[error("parse {input}: {source}")]
    Url {
        /// The offending text.
        input: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },

    /// A local file to upload could not be read.
    #[error("{}: {source}", path.display())]
    Io {
        /// File being uploaded.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// An `(owner, repo)` scope on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    /// User or organisation.
    pub owner: String,
    /// Repository name.
    pub repo: String,
}

impl RepoRef {
    /// Scope for `owner/repo`.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// A remote release, keyed by tag within a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Numeric release ID.
    pub id: u64,
    /// Tag the release is attached to.
    #[serde(default)]
    pub tag_name: String,
    /// Whether the release is unpublished.
    #[serde(default)]
    pub draft: bool,
}

/// A file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Numeric asset ID.
    pub id: u64,
    /// File name as shown on the release page.
    #[serde(default)]
    pub name: String,
}

/// Body of a create-release request.
#[derive(Debug, Clone, Serialize)]
pub struct NewRelease {
    /// Tag to attach the release to.
    pub tag_name: String,
    /// Create unpublished.
    pub draft: bool,
}

/// Body of an edit-release request.
#[derive(Debug, Clone, Serialize)]
pub struct ReleasePatch {
    /// New draft state.
    pub draft: bool,
}

/// One page of a list endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page, in server order.
    pub items: Vec<T>,
    /// Page number to request next, if the server advertised one.
    pub next_page: Option<u32>,
}

/// Release and asset operations on a remote host.
#[async_trait]
pub trait ReleaseApi: Send + Sync {
    /// One page of releases. `None` requests the first page.
    async fn list_releases(
        &self,
        repo: &RepoRef,
        page: Option<u32>,
    ) -> Result<Page<Release>, ApiError>;

    /// Create a release.
    async fn create_release(
        &self,
        repo: &RepoRef,
        release: &NewRelease,
    ) -> Result<Release, ApiError>;

    /// Update a release in place.
    async fn edit_release(
        &self,
        repo: &RepoRef,
        id: u64,
        patch: &ReleasePatch,
    ) -> Result<Release, ApiError>;

    /// One page of a release's assets.
    async fn list_assets(
        &self,
        repo: &RepoRef,
        release_id: u64,
        page: Option<u32>,
    ) -> Result<Page<Asset>, ApiError>;

    /// Delete one asset.
    async fn delete_asset(&self, repo: &RepoRef, asset_id: u64) -> Result<(), ApiError>;

    /// Upload `path` as an asset called `name`.
    async fn upload_asset(
        &self,
        repo: &RepoRef,
        release_id: u64,
        name: &str,
        path: &Path,
    ) -> Result<Asset, ApiError>;
}

/// Follow a paginated listing from the first page until the server stops
/// advertising a next page, keeping page order.
pub async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>, ApiError>
where
    F: FnMut(Option<u32>) -> Fut,
    Fut: Future<Output = Result<Page<T>, ApiError>>,
{
    let mut all = Vec::with_capacity(PER_PAGE as usize);
    let mut page = None;
    loop {
        let Page { items, next_page } = fetch(page).await?;
        all.extend(items);
        match next_page {
            Some(next) => page = Some(next),
            None => return Ok(all),
        }
    }
}

/// Every release of `repo`, in listing order.
pub async fn all_releases(api: &dyn ReleaseApi, repo: &RepoRef) -> Result<Vec<Release>, ApiError> {
    collect_pages(|page| api.list_releases(repo, page)).await
}

/// Every asset of a release, in listing order.
pub async fn all_assets(
    api: &dyn ReleaseApi,
    repo: &RepoRef,
    release_id: u64,
) -> Result<Vec<Asset>, ApiError> {
    collect_pages(|page| api.list_assets(repo, release_id, page)).await
}

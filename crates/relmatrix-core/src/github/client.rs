//! GitHub REST implementation of [`ReleaseApi`].

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, LINK};
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::io::ReaderStream;
use url::Url;

use super::{ApiError, Asset, NewRelease, Page, Release, ReleaseApi, ReleasePatch, RepoRef};
use crate::USER_AGENT;

/// Public GitHub API.
pub const DEFAULT_API_URL: &str = "https://api.github.com/";
/// Public GitHub upload host.
pub const DEFAULT_UPLOAD_URL: &str = "https://uploads.github.com/";
/// Items requested per page on list endpoints.
pub const PER_PAGE: u32 = 100;

const MEDIA_TYPE: &str = "application/vnd.github+json";

/// Error body returned by the API on failure.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Authenticated client for the GitHub REST API.
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: Url,
    upload_base: Url,
    token: String,
}

impl fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubClient")
            .field("api_base", &self.api_base.as_str())
            .field("upload_base", &self.upload_base.as_str())
            .finish_non_exhaustive()
    }
}

impl GithubClient {
    /// Client authenticated with `token`.
    ///
    /// `api_url` replaces both the API and the upload base (GitHub
    /// Enterprise serves both from one host). A trailing `/` is added when
    /// missing. `None` or an empty string selects the public hosts.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Url`] if `api_url` does not parse as an absolute
    /// URL, or [`ApiError::Http`] if the HTTP client cannot be built.
    pub fn new(token: impl Into<String>, api_url: Option<&str>) -> Result<Self, ApiError> {
        let (api_base, upload_base) = match api_url.filter(|u| !u.is_empty()) {
            Some(raw) => {
                let base = parse_base(raw)?;
                (base.clone(), base)
            }
            None => (parse_base(DEFAULT_API_URL)?, parse_base(DEFAULT_UPLOAD_URL)?),
        };

        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;

        Ok(Self {
            http,
            api_base,
            upload_base,
            token: token.into(),
        })
    }

    /// Base every API request is resolved against.
    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// Base every upload is resolved against.
    pub fn upload_base(&self) -> &Url {
        &self.upload_base
    }

    fn endpoint(base: &Url, path: &str) -> Result<Url, ApiError> {
        base.join(path).map_err(|source| ApiError::Url {
            input: format!("{base}{path}"),
            source,
        })
    }

    fn releases_url(&self, repo: &RepoRef, rest: &str) -> Result<Url, ApiError> {
        Self::endpoint(
            &self.api_base,
            &format!("repos/{}/{}/releases{rest}", repo.owner, repo.repo),
        )
    }

    /// Authenticate, send, and turn non-2xx answers into [`ApiError::Status`].
    async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let request = builder
            .bearer_auth(&self.token)
            .header(ACCEPT, MEDIA_TYPE)
            .build()?;
        let method = request.method().to_string();
        let url = request.url().to_string();
        tracing::debug!("{method} {url}");

        let response = self.http.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .map(|b| b.message)
            .filter(|m| !m.is_empty())
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_default();

        Err(ApiError::Status {
            method,
            url,
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        Ok(self.send(builder).await?.json().await?)
    }

    async fn page<T: DeserializeOwned>(&self, url: Url, page: Option<u32>) -> Result<Page<T>, ApiError> {
        let response = self.send(self.http.get(url).query(&page_query(page))).await?;
        let next = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_page);
        Ok(Page {
            items: response.json().await?,
            next_page: next,
        })
    }
}

#[async_trait]
impl ReleaseApi for GithubClient {
    async fn list_releases(
        &self,
        repo: &RepoRef,
        page: Option<u32>,
    ) -> Result<Page<Release>, ApiError> {
        self.page(self.releases_url(repo, "")?, page).await
    }

    async fn create_release(
        &self,
        repo: &RepoRef,
        release: &NewRelease,
    ) -> Result<Release, ApiError> {
        let url = self.releases_url(repo, "")?;
        self.json(self.http.post(url).json(release)).await
    }

    async fn edit_release(
        &self,
        repo: &RepoRef,
        id: u64,
        patch: &ReleasePatch,
    ) -> Result<Release, ApiError> {
        let url = self.releases_url(repo, &format!("/{id}"))?;
        self.json(self.http.patch(url).json(patch)).await
    }

    async fn list_assets(
        &self,
        repo: &RepoRef,
        release_id: u64,
        page: Option<u32>,
    ) -> Result<Page<Asset>, ApiError> {
        let url = self.releases_url(repo, &format!("/{release_id}/assets"))?;
        self.page(url, page).await
    }

    async fn delete_asset(&self, repo: &RepoRef, asset_id: u64) -> Result<(), ApiError> {
        let url = self.releases_url(repo, &format!("/assets/{asset_id}"))?;
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn upload_asset(
        &self,
        repo: &RepoRef,
        release_id: u64,
        name: &str,
        path: &Path,
    ) -> Result<Asset, ApiError> {
        let io_err = |source| ApiError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let len = file.metadata().await.map_err(io_err)?.len();

        let url = Self::endpoint(
            &self.upload_base,
            &format!(
                "repos/{}/{}/releases/{release_id}/assets",
                repo.owner, repo.repo
            ),
        )?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        self.json(
            self.http
                .post(url)
                .query(&[("name", name)])
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(CONTENT_LENGTH, len)
                .body(body),
        )
        .await
    }
}

fn parse_base(raw: &str) -> Result<Url, ApiError> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&with_slash).map_err(|source| ApiError::Url {
        input: raw.to_string(),
        source,
    })
}

fn page_query(page: Option<u32>) -> Vec<(&'static str, String)> {
    let mut query = vec![("per_page", PER_PAGE.to_string())];
    if let Some(page) = page {
        query.push(("page", page.to_string()));
    }
    query
}

/// Page number of the `rel="next"` entry of a `Link` header.
pub fn next_page(link: &str) -> Option<u32> {
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        if !params.split(';').any(|p| p.trim() == r#"rel="next""#) {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(target)
            .ok()?
            .query_pairs()
            .find(|(k, _)| k == "page")
            .and_then(|(_, v)| v.parse().ok())
    })
}

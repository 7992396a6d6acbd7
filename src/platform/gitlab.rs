use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;
use url::Url;

use super::{fetch_all_pages, ReleaseClient, PER_PAGE};
use crate::error::{MirrorError, Result};
use crate::models::{Asset, RateLimitInfo, Release};
use crate::repository::{Platform, Repository, GITLAB_URL};
use crate::transport::{sensitive_header, ApiProfile, RetryPolicy, Transport};

// GitLab drops the X- prefix on its quota headers
const PROFILE: ApiProfile = ApiProfile {
    remaining_header: "ratelimit-remaining",
    reset_header: "ratelimit-reset",
    unauthorized_is_denied: true,
};

const LIMIT_HEADER: &str = "ratelimit-limit";

const TOKEN_HEADER: HeaderName = HeaderName::from_static("private-token");

#[derive(Debug, Deserialize)]
struct GitLabRelease {
    tag_name: String,
    name: Option<String>,
    released_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    upcoming_release: bool,
    #[serde(default)]
    assets: GitLabAssets,
}

#[derive(Debug, Deserialize, Default)]
struct GitLabAssets {
    #[serde(default)]
    links: Vec<GitLabLink>,
}

#[derive(Debug, Deserialize)]
struct GitLabLink {
    name: String,
    url: String,
    direct_asset_url: Option<String>,
}

impl GitLabRelease {
    fn into_release(self, source: &str) -> Result<Release> {
        let published_at = self
            .released_at
            .or(self.created_at)
            .ok_or_else(|| MirrorError::Decode {
                url: source.to_string(),
                message: format!("release {} missing released_at and created_at", self.tag_name),
            })?;

        // Links carry no size, digest or timestamp of their own
        let assets = self
            .assets
            .links
            .into_iter()
            .map(|link| Asset {
                name: link.name,
                download_url: link.direct_asset_url.filter(|u| !u.is_empty()).unwrap_or(link.url),
                size: 0,
                digest: None,
                updated_at: published_at,
            })
            .collect();

        Ok(Release {
            name: self.name.filter(|n| !n.is_empty()).unwrap_or_else(|| self.tag_name.clone()),
            tag_name: self.tag_name,
            draft: false,
            prerelease: self.upcoming_release,
            published_at,
            assets,
        })
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Quota from response headers; `None` when rate limiting isn't advertised
fn rate_limit_from_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let limit = header_u64(headers, LIMIT_HEADER)?;
    let remaining = header_u64(headers, PROFILE.remaining_header)?;
    Some(RateLimitInfo {
        limit,
        remaining,
        used: limit.saturating_sub(remaining),
    })
}

/// Whether `url` is served by the instance rooted at `base`
fn same_origin(url: &str, base: &str) -> bool {
    match (Url::parse(url), Url::parse(base)) {
        (Ok(url), Ok(base)) => url.origin() == base.origin(),
        _ => false,
    }
}

/// GitLab REST adapter, for gitlab.com and self-hosted instances
pub struct GitLabClient {
    transport: Transport,
    token: Option<HeaderValue>,
}

impl GitLabClient {
    pub fn new(proxy: Option<&str>, token: Option<&str>, retry: RetryPolicy) -> Result<Self> {
        let token = token.map(sensitive_header).transpose()?;

        let mut api_headers = HeaderMap::new();
        if let Some(token) = &token {
            api_headers.insert(TOKEN_HEADER, token.clone());
        }

        let transport =
            Transport::new(PROFILE, proxy, HeaderMap::new(), retry)?.with_api_headers(api_headers);

        Ok(Self { transport, token })
    }

    /// Token header for a download, only when it stays on the repository's instance.
    ///
    /// Release links may point anywhere; the token is never sent off-instance.
    fn download_headers(&self, repo: &Repository, url: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            if same_origin(url, repo.gitlab_base()) {
                headers.insert(TOKEN_HEADER, token.clone());
            }
        }
        headers
    }
}

#[async_trait]
impl ReleaseClient for GitLabClient {
    fn platform(&self) -> Platform {
        Platform::GitLab
    }

    fn request_count(&self) -> u64 {
        self.transport.request_count()
    }

    async fn list_releases(&self, repo: &Repository) -> Result<Vec<Release>> {
        let url = repo.releases_url();
        let raw: Vec<GitLabRelease> = fetch_all_pages(&self.transport, &url, PER_PAGE).await?;
        debug!("{}: {} releases listed", repo, raw.len());

        raw.into_iter().map(|r| r.into_release(&url)).collect()
    }

    async fn count_releases(&self, repo: &Repository) -> Result<u64> {
        self.transport.count_releases(&repo.releases_url()).await
    }

    /// GitLab has no quota endpoint; probe `/api/v4/version` and read headers
    async fn rate_limit(&self, host: Option<&str>) -> Result<Option<RateLimitInfo>> {
        let base = host.unwrap_or(GITLAB_URL).trim_end_matches('/');
        let url = format!("{}/api/v4/version", base);

        match self.transport.probe_headers(&url).await {
            Ok(headers) => Ok(rate_limit_from_headers(&headers)),
            Err(e) => {
                debug!("gitlab rate limit probe failed: {}", e);
                Ok(None)
            }
        }
    }

    async fn download_file(
        &self,
        repo: &Repository,
        url: &str,
        dest: &Path,
        expected_size: u64,
    ) -> Result<()> {
        let headers = self.download_headers(repo, url);
        self.transport
            .download(url, dest, expected_size, &headers)
            .await
    }
}

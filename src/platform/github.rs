use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use super::{fetch_all_pages, ReleaseClient, PER_PAGE};
use crate::checksum::normalize_digest;
use crate::error::{MirrorError, Result};
use crate::models::{Asset, RateLimitInfo, Release};
use crate::repository::{Platform, Repository};
use crate::transport::{insert_bearer, ApiProfile, RetryPolicy, Transport};

const PROFILE: ApiProfile = ApiProfile {
    remaining_header: "x-ratelimit-remaining",
    reset_header: "x-ratelimit-reset",
    unauthorized_is_denied: false,
};

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    name: Option<String>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    published_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: u64,
    digest: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    rate: RateBucket,
}

#[derive(Debug, Deserialize)]
struct RateBucket {
    limit: u64,
    remaining: u64,
    used: u64,
}

/// GitHub digests look like `sha256:<hex>`; anything else is dropped
fn parse_digest(raw: &str) -> Option<String> {
    normalize_digest(raw.strip_prefix("sha256:").unwrap_or(raw))
}

impl GitHubRelease {
    fn into_release(self, source: &str) -> Result<Release> {
        // Drafts have no published_at
        let published_at = self
            .published_at
            .or(self.created_at)
            .ok_or_else(|| MirrorError::Decode {
                url: source.to_string(),
                message: format!("release {} has no publish or creation date", self.tag_name),
            })?;

        let assets = self
            .assets
            .into_iter()
            .map(|a| Asset {
                digest: a.digest.as_deref().and_then(parse_digest),
                name: a.name,
                download_url: a.browser_download_url,
                size: a.size,
                updated_at: a.updated_at,
            })
            .collect();

        Ok(Release {
            name: self.name.filter(|n| !n.is_empty()).unwrap_or_else(|| self.tag_name.clone()),
            tag_name: self.tag_name,
            draft: self.draft,
            prerelease: self.prerelease,
            published_at,
            assets,
        })
    }
}

/// GitHub REST adapter
pub struct GitHubClient {
    transport: Transport,
    api_base: String,
    download_headers: HeaderMap,
}

impl GitHubClient {
    pub fn new(
        proxy: Option<&str>,
        token: Option<&str>,
        api_base: &str,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        if let Some(token) = token {
            insert_bearer(&mut headers, token)?;
        }

        // Asset URLs only serve the binary with this Accept override
        let mut download_headers = HeaderMap::new();
        download_headers.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));

        Ok(Self {
            transport: Transport::new(PROFILE, proxy, headers, retry)?,
            api_base: api_base.trim_end_matches('/').to_string(),
            download_headers,
        })
    }
}

#[async_trait]
impl ReleaseClient for GitHubClient {
    fn platform(&self) -> Platform {
        Platform::GitHub
    }

    fn request_count(&self) -> u64 {
        self.transport.request_count()
    }

    async fn list_releases(&self, repo: &Repository) -> Result<Vec<Release>> {
        let url = repo.releases_url_with(&self.api_base);
        let raw: Vec<GitHubRelease> = fetch_all_pages(&self.transport, &url, PER_PAGE).await?;
        debug!("{}: {} releases listed", repo, raw.len());

        raw.into_iter().map(|r| r.into_release(&url)).collect()
    }

    async fn count_releases(&self, repo: &Repository) -> Result<u64> {
        self.transport
            .count_releases(&repo.releases_url_with(&self.api_base))
            .await
    }

    async fn rate_limit(&self, _host: Option<&str>) -> Result<Option<RateLimitInfo>> {
        let url = format!("{}/rate_limit", self.api_base);
        let response: RateLimitResponse = self.transport.get_json(&url).await?;
        Ok(Some(RateLimitInfo {
            limit: response.rate.limit,
            remaining: response.rate.remaining,
            used: response.rate.used,
        }))
    }

    async fn download_file(
        &self,
        _repo: &Repository,
        url: &str,
        dest: &Path,
        expected_size: u64,
    ) -> Result<()> {
        self.transport
            .download(url, dest, expected_size, &self.download_headers)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HEX: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[test]
    fn test_release_conversion() {
        let raw: GitHubRelease = serde_json::from_value(json!({
            "tag_name": "v1.0.0",
            "name": null,
            "draft": false,
            "prerelease": true,
            "published_at": "2024-03-01T12:00:00Z",
            "assets": [{
                "name": "tool.tar.gz",
                "browser_download_url": "https://github.com/o/r/releases/download/v1.0.0/tool.tar.gz",
                "size": 100,
                "digest": format!("sha256:{}", HEX.to_uppercase()),
                "updated_at": "2024-03-01T11:00:00Z"
            }]
        }))
        .unwrap();

        let release = raw.into_release("test").unwrap();
        assert_eq!(release.name, "v1.0.0");
        assert!(release.prerelease);
        assert_eq!(release.assets.len(), 1);
        assert_eq!(release.assets[0].size, 100);
        assert_eq!(release.assets[0].digest.as_deref(), Some(HEX));
    }

    #[test]
    fn test_draft_falls_back_to_created_at() {
        let raw: GitHubRelease = serde_json::from_value(json!({
            "tag_name": "v2.0.0-draft",
            "name": "Next",
            "draft": true,
            "prerelease": false,
            "published_at": null,
            "created_at": "2024-04-01T00:00:00Z",
            "assets": []
        }))
        .unwrap();

        let release = raw.into_release("test").unwrap();
        assert!(release.draft);
        assert_eq!(release.name, "Next");
        assert_eq!(release.published_at.to_rfc3339(), "2024-04-01T00:00:00+00:00");
    }

    #[test]
    fn test_parse_digest() {
        assert_eq!(parse_digest(&format!("sha256:{}", HEX)).as_deref(), Some(HEX));
        assert_eq!(parse_digest(HEX).as_deref(), Some(HEX));
        assert_eq!(parse_digest("sha512:abcdef"), None);
        assert_eq!(parse_digest("sha256:short"), None);
    }
}

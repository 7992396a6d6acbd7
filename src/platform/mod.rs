//! Platform API adapters
//!
//! GitHub and GitLab differ in auth headers, quota header names, error codes and
//! JSON shapes. Each adapter implements [`ReleaseClient`] over a shared
//! [`Transport`](crate::transport::Transport), and [`create_client`] selects the
//! adapter for a [`Platform`].

pub mod github;
pub mod gitlab;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::config::Config;
use crate::error::Result;
use crate::models::{RateLimitInfo, Release};
use crate::repository::{Platform, Repository};
use crate::transport::{RetryPolicy, Transport};

pub use github::GitHubClient;
pub use gitlab::GitLabClient;

/// Releases requested per listing page
pub const PER_PAGE: u32 = 100;

/// Capability shared by all platform adapters
#[async_trait]
pub trait ReleaseClient: Send + Sync {
    fn platform(&self) -> Platform;

    /// API requests issued so far
    fn request_count(&self) -> u64;

    /// All releases of `repo`, newest first as listed by the host
    async fn list_releases(&self, repo: &Repository) -> Result<Vec<Release>>;

    /// Total release count using a single request
    async fn count_releases(&self, repo: &Repository) -> Result<u64>;

    /// Current quota, or `None` when the host doesn't report one.
    ///
    /// `host` selects a self-hosted instance where the platform has several.
    async fn rate_limit(&self, host: Option<&str>) -> Result<Option<RateLimitInfo>>;

    /// Stream an asset of `repo` to `dest`
    async fn download_file(
        &self,
        repo: &Repository,
        url: &str,
        dest: &Path,
        expected_size: u64,
    ) -> Result<()>;
}

/// Create the adapter for `platform`, authenticated from `config`
pub fn create_client(
    platform: Platform,
    config: &Config,
    retry: RetryPolicy,
) -> Result<Box<dyn ReleaseClient>> {
    let client: Box<dyn ReleaseClient> = match platform {
        Platform::GitHub => Box::new(GitHubClient::new(
            config.proxy.as_deref(),
            config.github_token.as_deref(),
            config.github_api_url(),
            retry,
        )?),
        Platform::GitLab => Box::new(GitLabClient::new(
            config.proxy.as_deref(),
            config.gitlab_token.as_deref(),
            retry,
        )?),
    };
    Ok(client)
}

/// Walk `per_page`/`page` pagination until a short or empty page
pub(crate) async fn fetch_all_pages<T: DeserializeOwned>(
    transport: &Transport,
    releases_url: &str,
    per_page: u32,
) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut page = 1;

    loop {
        let url = format!("{}?per_page={}&page={}", releases_url, per_page, page);
        let batch: Vec<T> = transport.get_json_with_retry(&url).await?;

        if batch.is_empty() {
            break;
        }

        let short_page = batch.len() < per_page as usize;
        items.extend(batch);

        if short_page {
            break;
        }

        page += 1;
    }

    Ok(items)
}

//! Mirror Engine - Orchestrates release synchronization
//!
//! For each repository the engine lists releases, lays out one directory per
//! tag, downloads checksum manifests before regular assets so inferred digests
//! are known at download time, verifies existing and fresh files, stamps
//! modification times, and finally repoints the `latest` symlink.
//!
//! Everything runs sequentially: one repository, one release, one asset at a
//! time. The filesystem is the only record of what has been mirrored.

use filetime::FileTime;
use std::collections::HashMap;
use std::path::{Component, Path};
use std::sync::Arc;
use tracing::Level;

use crate::checksum::{is_checksum_file, parse_checksums, verify_file_async, ChecksumMap};
use crate::config::Config;
use crate::error::{MirrorError, Result};
use crate::models::{Asset, EstimateReport, MirrorResult, RateLimitInfo, Release, RepoEstimate};
use crate::platform::{create_client, ReleaseClient, PER_PAGE};
use crate::report::{Reporter, TracingReporter};
use crate::repository::{Platform, Repository};
use crate::transport::{reset_wait, RetryPolicy};

/// Name of the pointer to the newest stable release directory
pub const LATEST_LINK: &str = "latest";

/// The main engine that mirrors releases into the local tree
pub struct ReleaseMirror {
    config: Arc<Config>,
    dry_run: bool,
    clients: HashMap<Platform, Box<dyn ReleaseClient>>,
    reporter: Arc<dyn Reporter>,
}

impl ReleaseMirror {
    /// Create an engine with the default retry policy, reporting through `tracing`
    pub fn new(config: Config, dry_run: bool) -> Result<Self> {
        Self::with_options(config, dry_run, RetryPolicy::default(), Arc::new(TracingReporter))
    }

    /// Create an engine with an explicit retry policy and reporter
    pub fn with_options(
        config: Config,
        dry_run: bool,
        retry: RetryPolicy,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self> {
        let mut clients = Vec::new();
        for platform in [Platform::GitHub, Platform::GitLab] {
            clients.push(create_client(platform, &config, retry.clone())?);
        }
        Ok(Self::with_clients(config, dry_run, clients, reporter))
    }

    /// Create an engine over caller-supplied platform adapters
    pub fn with_clients(
        config: Config,
        dry_run: bool,
        clients: Vec<Box<dyn ReleaseClient>>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let clients = clients
            .into_iter()
            .map(|client| (client.platform(), client))
            .collect();

        Self {
            config: Arc::new(config),
            dry_run,
            clients,
            reporter,
        }
    }

    /// Get configuration for external inspection
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn emit(&self, level: Level, message: impl AsRef<str>) {
        self.reporter.report(level, message.as_ref());
    }

    fn client(&self, platform: Platform) -> Result<&dyn ReleaseClient> {
        self.clients
            .get(&platform)
            .map(|c| c.as_ref())
            .ok_or_else(|| MirrorError::config(format!("no client configured for {}", platform)))
    }

    /// Mirror every configured repository in order
    pub async fn mirror_all(&self) -> MirrorResult {
        let urls = self.config.urls.clone();
        self.mirror_urls(&urls).await
    }

    /// Mirror a list of repository identifiers in order.
    ///
    /// A failure in one repository never stops the others.
    pub async fn mirror_urls(&self, urls: &[String]) -> MirrorResult {
        let mut total = MirrorResult::default();

        for url in urls {
            let repo = match Repository::resolve(url) {
                Ok(repo) => repo,
                Err(e) => {
                    self.emit(Level::ERROR, e.to_string());
                    total.errors.push(e.to_string());
                    continue;
                }
            };

            let result = self.mirror_repository(&repo).await;
            total.merge(result);
        }

        total
    }

    /// Mirror all releases of one repository
    pub async fn mirror_repository(&self, repo: &Repository) -> MirrorResult {
        let mut result = MirrorResult::default();
        let repo_path = repo.local_path(&self.config.base_dir);

        let client = match self.client(repo.platform) {
            Ok(client) => client,
            Err(e) => {
                self.record_error(&mut result, e.to_string());
                return result;
            }
        };
        let requests_before = client.request_count();

        self.emit(Level::INFO, format!("mirroring {} ({})", repo, repo.platform));

        let releases = match self.fetch_releases(client, repo).await {
            Ok(releases) => releases,
            Err(message) => {
                self.record_error(&mut result, message);
                result.api_requests = client.request_count() - requests_before;
                return result;
            }
        };

        self.emit(Level::DEBUG, format!("found {} releases", releases.len()));

        let mut latest: Option<&Release> = None;

        for release in &releases {
            if release.draft {
                self.emit(Level::DEBUG, format!("skipping draft: {}", release.tag_name));
                continue;
            }

            if !is_safe_relative(&release.tag_name, false) {
                self.record_error(
                    &mut result,
                    format!("refusing unsafe release tag: {}", release.tag_name),
                );
                continue;
            }

            if !release.prerelease && latest.is_none() {
                latest = Some(release);
            }

            let release_dir = repo_path.join(&release.tag_name);

            if !self.dry_run {
                if let Err(e) = tokio::fs::create_dir_all(&release_dir).await {
                    self.record_error(
                        &mut result,
                        format!("failed to create {}: {}", release_dir.display(), e),
                    );
                    continue;
                }
            }

            self.mirror_release(client, repo, release, &release_dir, &mut result)
                .await;
        }

        if let Some(release) = latest {
            if let Err(e) = self.update_latest_symlink(&repo_path, &release.tag_name) {
                self.record_error(&mut result, format!("failed to update latest: {}", e));
            }
        }

        result.api_requests = client.request_count() - requests_before;
        result
    }

    /// List releases, sleeping through one rate-limit rejection
    async fn fetch_releases(
        &self,
        client: &dyn ReleaseClient,
        repo: &Repository,
    ) -> std::result::Result<Vec<Release>, String> {
        match client.list_releases(repo).await {
            Ok(releases) => Ok(releases),
            Err(MirrorError::RateLimited { reset_at }) => {
                let wait = reset_wait(reset_at);
                self.emit(
                    Level::WARN,
                    format!("rate limited, waiting {}s...", wait.as_secs()),
                );
                tokio::time::sleep(wait).await;

                client
                    .list_releases(repo)
                    .await
                    .map_err(|e| format!("failed after rate limit wait: {}", e))
            }
            Err(MirrorError::NotFound(_)) => Err(format!("repository not found: {}", repo)),
            Err(e @ MirrorError::AccessDenied(_)) => Err(e.to_string()),
            Err(e) => Err(format!("failed to fetch releases for {}: {}", repo, e)),
        }
    }

    async fn mirror_release(
        &self,
        client: &dyn ReleaseClient,
        repo: &Repository,
        release: &Release,
        release_dir: &Path,
        result: &mut MirrorResult,
    ) {
        let (manifests, regular): (Vec<&Asset>, Vec<&Asset>) = release
            .assets
            .iter()
            .partition(|asset| is_checksum_file(&asset.name));

        let mut hash_lookup = ChecksumMap::new();

        for asset in manifests {
            self.mirror_asset(client, repo, asset, release_dir, None, result)
                .await;

            let manifest_path = release_dir.join(&asset.name);
            if !manifest_path.is_file() {
                continue;
            }

            match tokio::fs::read(&manifest_path).await {
                Ok(bytes) => {
                    let content = String::from_utf8_lossy(&bytes);
                    let parsed = parse_checksums(&content, Some(&asset.name));
                    if !parsed.is_empty() {
                        self.emit(
                            Level::DEBUG,
                            format!("parsed {} hashes from {}", parsed.len(), asset.name),
                        );
                    }
                    hash_lookup.extend(parsed);
                }
                Err(e) => {
                    self.emit(Level::WARN, format!("failed to read {}: {}", asset.name, e));
                }
            }
        }

        for asset in regular {
            // An API digest always wins over a manifest entry
            let inferred = match asset.digest {
                Some(_) => None,
                None => hash_lookup.get(&asset.name).map(String::as_str),
            };
            if inferred.is_some() {
                self.emit(
                    Level::DEBUG,
                    format!("using hash from checksum file for {}", asset.name),
                );
            }

            self.mirror_asset(client, repo, asset, release_dir, inferred, result)
                .await;
        }
    }

    async fn mirror_asset(
        &self,
        client: &dyn ReleaseClient,
        repo: &Repository,
        asset: &Asset,
        dest_dir: &Path,
        digest_override: Option<&str>,
        result: &mut MirrorResult,
    ) {
        if !is_safe_relative(&asset.name, true) {
            self.record_error(result, format!("refusing unsafe asset name: {}", asset.name));
            return;
        }

        let dest = dest_dir.join(&asset.name);
        let digest = asset.digest.as_deref().or(digest_override);

        if dest.exists() {
            // Without a digest an existing file is trusted as already mirrored
            if let Some(expected) = digest {
                match verify_file_async(&dest, expected).await {
                    Ok(()) => {}
                    Err(MirrorError::HashMismatch(mismatch)) => {
                        self.emit(Level::ERROR, format!("hash mismatch: {}", asset.name));
                        result.hash_mismatches.push(mismatch);
                        return;
                    }
                    Err(e) => {
                        self.record_error(result, format!("failed to verify {}: {}", asset.name, e));
                        return;
                    }
                }
            }

            self.emit(Level::DEBUG, format!("skipped (exists): {}", asset.name));
            result.skipped.push(dest);
            return;
        }

        if self.dry_run {
            self.emit(
                Level::INFO,
                format!("would download: {} ({} bytes)", asset.name, asset.size),
            );
            return;
        }

        self.emit(Level::INFO, format!("downloading: {}", asset.name));

        if let Err(e) = client
            .download_file(repo, &asset.download_url, &dest, asset.size)
            .await
        {
            self.record_error(result, format!("download failed for {}: {}", asset.name, e));
            return;
        }

        if let Some(expected) = digest {
            match verify_file_async(&dest, expected).await {
                Ok(()) => {}
                Err(MirrorError::HashMismatch(mismatch)) => {
                    self.emit(
                        Level::ERROR,
                        format!("hash mismatch after download: {}", asset.name),
                    );
                    if let Err(e) = tokio::fs::remove_file(&dest).await {
                        self.emit(
                            Level::WARN,
                            format!("failed to remove {}: {}", dest.display(), e),
                        );
                    }
                    result.hash_mismatches.push(mismatch);
                    return;
                }
                Err(e) => {
                    self.record_error(result, format!("failed to verify {}: {}", asset.name, e));
                    return;
                }
            }
        }

        let mtime = FileTime::from_unix_time(
            asset.updated_at.timestamp(),
            asset.updated_at.timestamp_subsec_nanos(),
        );
        if let Err(e) = filetime::set_file_times(&dest, mtime, mtime) {
            self.emit(
                Level::WARN,
                format!("failed to set mtime on {}: {}", dest.display(), e),
            );
        }

        self.emit(Level::INFO, format!("downloaded: {}", asset.name));
        result.downloaded.push(dest);
    }

    /// Atomically point `<repo_path>/latest` at `<repo_path>/<tag>`.
    ///
    /// A temporary link is renamed over the old one so `latest` never
    /// disappears. A non-symlink occupying `latest` is left untouched.
    pub fn update_latest_symlink(&self, repo_path: &Path, tag: &str) -> Result<()> {
        let link = repo_path.join(LATEST_LINK);
        let target = repo_path.join(tag);

        if !target.is_dir() {
            return Ok(());
        }

        match std::fs::symlink_metadata(&link) {
            Ok(meta) if meta.file_type().is_symlink() => {
                if let (Ok(current), Ok(wanted)) =
                    (std::fs::canonicalize(&link), std::fs::canonicalize(&target))
                {
                    if current == wanted {
                        return Ok(());
                    }
                }
            }
            Ok(_) => {
                self.emit(
                    Level::WARN,
                    format!("'latest' exists but is not a symlink: {}", link.display()),
                );
                return Ok(());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(MirrorError::io(&link, e)),
        }

        if self.dry_run {
            self.emit(Level::DEBUG, format!("would update latest -> {}", tag));
            return Ok(());
        }

        let temp_link = repo_path.join(format!(".latest.tmp.{}", std::process::id()));
        if std::fs::symlink_metadata(&temp_link).is_ok() {
            std::fs::remove_file(&temp_link).map_err(|e| MirrorError::io(&temp_link, e))?;
        }

        create_dir_symlink(Path::new(tag), &temp_link)
            .map_err(|e| MirrorError::io(&temp_link, e))?;

        if let Err(e) = std::fs::rename(&temp_link, &link) {
            let _ = std::fs::remove_file(&temp_link);
            return Err(MirrorError::io(&link, e));
        }

        self.emit(Level::DEBUG, format!("updated latest -> {}", tag));
        Ok(())
    }

    /// Release count and listing cost for one repository, using one request
    pub async fn estimate_repository(&self, repo: &Repository) -> RepoEstimate {
        let (release_count, api_requests) = match self.client(repo.platform) {
            Ok(client) => match client.count_releases(repo).await {
                Ok(count) => (count, count.div_ceil(u64::from(PER_PAGE))),
                Err(e) => {
                    self.emit(Level::ERROR, format!("failed to estimate {}: {}", repo, e));
                    (0, 0)
                }
            },
            Err(e) => {
                self.emit(Level::ERROR, format!("failed to estimate {}: {}", repo, e));
                (0, 0)
            }
        };

        RepoEstimate {
            repository: repo.full_name(),
            release_count,
            api_requests,
        }
    }

    /// Estimate the API cost of mirroring `urls` without fetching any assets
    pub async fn estimate_all(&self, urls: &[String]) -> EstimateReport {
        let mut report = EstimateReport::default();

        let mut repos = Vec::new();
        for url in urls {
            match Repository::resolve(url) {
                Ok(repo) => repos.push(repo),
                Err(e) => self.emit(Level::ERROR, e.to_string()),
            }
        }

        let requests_before = self.total_requests();

        if repos.iter().any(|r| r.platform == Platform::GitHub) {
            report.github_rate_limit = self.probe_rate_limit(Platform::GitHub, None).await;
            match report.github_rate_limit {
                Some(rl) => self.emit(
                    Level::INFO,
                    format!("github rate limit: {}/{} remaining", rl.remaining, rl.limit),
                ),
                None => self.emit(Level::WARN, "github rate limit: unknown"),
            }
        }

        if let Some(gitlab_repo) = repos.iter().find(|r| r.platform == Platform::GitLab) {
            report.gitlab_rate_limit = self
                .probe_rate_limit(Platform::GitLab, gitlab_repo.base_url.as_deref())
                .await;
            match report.gitlab_rate_limit {
                Some(rl) => self.emit(
                    Level::INFO,
                    format!("gitlab rate limit: {}/{} remaining", rl.remaining, rl.limit),
                ),
                None => self.emit(Level::INFO, "gitlab rate limit: not enabled or unknown"),
            }
        }

        self.emit(Level::INFO, "estimating api requests...");

        for repo in &repos {
            let estimate = self.estimate_repository(repo).await;
            self.emit(
                Level::INFO,
                format!(
                    "  {}: {} releases -> {} requests",
                    estimate.repository, estimate.release_count, estimate.api_requests
                ),
            );
            report.repositories.push(estimate);
        }

        report.estimate_requests = self.total_requests() - requests_before;
        report
    }

    async fn probe_rate_limit(
        &self,
        platform: Platform,
        host: Option<&str>,
    ) -> Option<RateLimitInfo> {
        let client = self.client(platform).ok()?;
        match client.rate_limit(host).await {
            Ok(info) => info,
            Err(e) => {
                self.emit(Level::DEBUG, format!("{} rate limit probe failed: {}", platform, e));
                None
            }
        }
    }

    fn total_requests(&self) -> u64 {
        self.clients.values().map(|c| c.request_count()).sum()
    }

    fn record_error(&self, result: &mut MirrorResult, message: String) {
        self.emit(Level::ERROR, &message);
        result.errors.push(message);
    }
}

/// Whether `name` stays inside its parent directory when joined onto it
fn is_safe_relative(name: &str, single_component: bool) -> bool {
    let mut count = 0;
    for component in Path::new(name).components() {
        match component {
            Component::Normal(_) => count += 1,
            _ => return false,
        }
    }
    count > 0 && (!single_component || count == 1)
}

#[cfg(unix)]
fn create_dir_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_dir_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

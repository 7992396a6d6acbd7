//! Common test utilities and helpers for release-mirror tests
#![allow(dead_code)]

use release_mirror::{Config, ReleaseMirror, Reporter, RetryPolicy};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::env;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tracing::Level;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const OWNER: &str = "acme";
pub const REPO: &str = "tool";
pub const PUBLISHED: &str = "2024-03-01T12:00:00Z";
pub const ASSET_UPDATED: &str = "2024-03-01T11:00:00Z";

/// Isolated base directory plus environment restoration
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub original_env: Vec<(String, Option<String>)>,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        // Store original environment variables
        let env_vars = ["GITHUB_TOKEN", "GITLAB_TOKEN", "XDG_CONFIG_HOME"];
        let original_env = env_vars
            .iter()
            .map(|var| (var.to_string(), env::var(var).ok()))
            .collect();

        Self {
            temp_dir,
            original_env,
        }
    }

    pub fn base_dir(&self) -> PathBuf {
        self.temp_dir.path().join("mirror")
    }

    pub fn github_repo_dir(&self) -> PathBuf {
        self.base_dir().join("GitHubReleases").join(OWNER).join(REPO)
    }

    pub fn create_config(&self, name: &str, content: &str) -> PathBuf {
        let config_path = self.temp_dir.path().join(name);
        std::fs::write(&config_path, content).expect("Failed to write test config");
        config_path
    }
}

impl Drop for TestEnvironment {
    fn drop(&mut self) {
        // Restore original environment variables
        for (key, value) in &self.original_env {
            match value {
                Some(val) => env::set_var(key, val),
                None => env::remove_var(key),
            }
        }
    }
}

/// Reporter that keeps every message for later assertions
#[derive(Default)]
pub struct RecordingReporter {
    messages: Mutex<Vec<(Level, String)>>,
}

impl RecordingReporter {
    pub fn messages(&self) -> Vec<(Level, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.messages()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, level: Level, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }
}

/// Fast retries so failure paths don't slow the suite down
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(5))
}

/// Engine pointed at `server` for GitHub API calls
pub fn mirror_for(
    server: &MockServer,
    env: &TestEnvironment,
    dry_run: bool,
) -> (ReleaseMirror, Arc<RecordingReporter>) {
    let mut config = Config::with_base_dir(env.base_dir());
    config.github_api_url = Some(server.uri());

    let reporter = Arc::new(RecordingReporter::default());
    let mirror = ReleaseMirror::with_options(config, dry_run, fast_retry(), reporter.clone())
        .expect("Failed to build mirror");
    (mirror, reporter)
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Download path served by the mock for an asset
pub fn asset_path(tag: &str, name: &str) -> String {
    format!("/download/{}/{}", tag, name)
}

/// GitHub asset JSON, downloadable from `server`
pub fn github_asset(server: &MockServer, tag: &str, name: &str, body: &[u8], digest: Option<&str>) -> Value {
    json!({
        "name": name,
        "browser_download_url": format!("{}{}", server.uri(), asset_path(tag, name)),
        "size": body.len(),
        "digest": digest,
        "updated_at": ASSET_UPDATED,
    })
}

/// GitHub release JSON
pub fn github_release(tag: &str, draft: bool, prerelease: bool, assets: Vec<Value>) -> Value {
    json!({
        "tag_name": tag,
        "name": tag,
        "draft": draft,
        "prerelease": prerelease,
        "published_at": if draft { Value::Null } else { json!(PUBLISHED) },
        "created_at": PUBLISHED,
        "assets": assets,
    })
}

/// Serve `releases` as the GitHub listing of `owner/repo`
pub async fn mount_github_releases(server: &MockServer, owner: &str, repo: &str, releases: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{}/{}/releases", owner, repo)))
        .respond_with(ResponseTemplate::new(200).set_body_json(releases))
        .mount(server)
        .await;
}

/// Serve `body` at the asset's download path
pub async fn mount_asset(server: &MockServer, tag: &str, name: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(asset_path(tag, name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

/// Serve `releases` as the GitLab listing of any project
pub async fn mount_gitlab_releases(server: &MockServer, releases: Value) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/v4/projects/.+/releases$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(releases))
        .mount(server)
        .await;
}

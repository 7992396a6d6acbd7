//! Repository identity resolution
//!
//! Turns user-supplied identifiers (`gh:owner/repo`, `gl:owner/repo`, GitHub and
//! GitLab URLs, bare `owner/repo`) into a normalized [`Repository`] and derives
//! the platform endpoints and local storage paths from it. No network access.

use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{MirrorError, Result};

/// Public GitHub REST API root.
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Public GitLab host.
pub const GITLAB_URL: &str = "https://gitlab.com";

/// Supported hosting platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    GitHub,
    GitLab,
}

impl Platform {
    /// Subdirectory of the base directory holding this platform's mirrors
    pub fn folder_name(self) -> &'static str {
        match self {
            Platform::GitHub => "GitHubReleases",
            Platform::GitLab => "GitLabReleases",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::GitHub => "github",
            Platform::GitLab => "gitlab",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A repository on a hosting platform.
///
/// `base_url` is only set for self-hosted GitLab instances; `None` means the
/// public host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repository {
    pub owner: String,
    pub repo: String,
    pub platform: Platform,
    pub base_url: Option<String>,
}

impl Repository {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, platform: Platform) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            platform,
            base_url: None,
        }
    }

    /// Resolve a free-form identifier into a repository
    pub fn resolve(input: &str) -> Result<Self> {
        let trimmed = input.trim().trim_end_matches('/');

        if let Some(path) = trimmed.strip_prefix("gh:") {
            return Self::from_path(path, Platform::GitHub, None);
        }

        if let Some(path) = trimmed.strip_prefix("gl:") {
            return Self::from_path(path, Platform::GitLab, None);
        }

        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            let url = Url::parse(trimmed).map_err(|e| {
                MirrorError::identity(format!("invalid repository url: {} ({})", input, e))
            })?;
            let host = url.host_str().unwrap_or_default().to_lowercase();
            let path = url.path().trim_start_matches('/');

            if host == "github.com" || host == "www.github.com" {
                return Self::from_path(path, Platform::GitHub, None);
            }

            if host.contains("gitlab") {
                let base_url = if host == "gitlab.com" || host == "www.gitlab.com" {
                    None
                } else {
                    Some(url.origin().ascii_serialization())
                };
                return Self::from_path(path, Platform::GitLab, base_url);
            }

            return Err(MirrorError::identity(format!("unknown host: {}", host)));
        }

        // Bare owner/repo defaults to GitHub
        if trimmed.contains('/') {
            return Self::from_path(trimmed, Platform::GitHub, None);
        }

        Err(MirrorError::identity(format!(
            "invalid repository url: {}",
            input
        )))
    }

    fn from_path(path: &str, platform: Platform, base_url: Option<String>) -> Result<Self> {
        let path = path.trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);

        let mut parts = path.split('/');
        match (parts.next(), parts.next()) {
            (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => Ok(Self {
                owner: owner.to_string(),
                repo: repo.to_string(),
                platform,
                base_url,
            }),
            _ => Err(MirrorError::identity(format!(
                "invalid repository path: {}",
                path
            ))),
        }
    }

    /// `owner/repo`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Root URL of the GitLab instance hosting this repository
    pub fn gitlab_base(&self) -> &str {
        self.base_url.as_deref().unwrap_or(GITLAB_URL)
    }

    /// Release-listing endpoint on the public hosts
    pub fn releases_url(&self) -> String {
        self.releases_url_with(GITHUB_API_URL)
    }

    /// Release-listing endpoint, with an explicit GitHub API root.
    ///
    /// GitLab repositories ignore `github_api` and use their own instance root.
    pub fn releases_url_with(&self, github_api: &str) -> String {
        match self.platform {
            Platform::GitHub => format!(
                "{}/repos/{}/{}/releases",
                github_api.trim_end_matches('/'),
                self.owner,
                self.repo
            ),
            Platform::GitLab => format!(
                "{}/api/v4/projects/{}%2F{}/releases",
                self.gitlab_base().trim_end_matches('/'),
                self.owner,
                self.repo
            ),
        }
    }

    /// `<base_dir>/<PlatformFolder>/<owner>/<repo>`
    pub fn local_path(&self, base_dir: &Path) -> PathBuf {
        base_dir
            .join(self.platform.folder_name())
            .join(&self.owner)
            .join(&self.repo)
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_github_url() {
        let repo = Repository::resolve("https://github.com/owner/repo").unwrap();
        assert_eq!(repo.owner, "owner");
        assert_eq!(repo.repo, "repo");
        assert_eq!(repo.platform, Platform::GitHub);
        assert_eq!(repo.base_url, None);
    }

    #[test]
    fn test_equivalent_github_forms() {
        let expected = Repository::new("a", "b", Platform::GitHub);
        for input in ["https://github.com/a/b.git/", "gh:a/b", "a/b", "https://github.com/a/b/"] {
            assert_eq!(Repository::resolve(input).unwrap(), expected, "{}", input);
        }
    }

    #[test]
    fn test_gitlab_forms() {
        let public = Repository::resolve("https://gitlab.com/owner/repo").unwrap();
        assert_eq!(public.platform, Platform::GitLab);
        assert_eq!(public.base_url, None);

        let shorthand = Repository::resolve("gl:owner/repo").unwrap();
        assert_eq!(shorthand, public);

        let hosted = Repository::resolve("https://gitlab.example.com/owner/repo.git").unwrap();
        assert_eq!(hosted.platform, Platform::GitLab);
        assert_eq!(hosted.repo, "repo");
        assert_eq!(hosted.base_url.as_deref(), Some("https://gitlab.example.com"));
    }

    #[test]
    fn test_invalid_identifiers() {
        assert_matches!(
            Repository::resolve("not-a-repo"),
            Err(MirrorError::Identity(msg)) if msg.contains("invalid repository url")
        );
        assert_matches!(
            Repository::resolve("https://bitbucket.org/owner/repo"),
            Err(MirrorError::Identity(msg)) if msg.contains("unknown host")
        );
        assert_matches!(Repository::resolve("gh:owner"), Err(MirrorError::Identity(_)));
        assert_matches!(
            Repository::resolve("https://github.com/owner"),
            Err(MirrorError::Identity(_))
        );
    }

    #[test]
    fn test_endpoints_and_paths() {
        let gh = Repository::new("owner", "repo", Platform::GitHub);
        assert_eq!(
            gh.releases_url(),
            "https://api.github.com/repos/owner/repo/releases"
        );
        assert_eq!(
            gh.local_path(Path::new("/mirror")),
            PathBuf::from("/mirror/GitHubReleases/owner/repo")
        );

        let gl = Repository::resolve("https://gitlab.example.com/group/tool").unwrap();
        assert_eq!(
            gl.releases_url(),
            "https://gitlab.example.com/api/v4/projects/group%2Ftool/releases"
        );
        assert_eq!(
            gl.local_path(Path::new("/mirror")),
            PathBuf::from("/mirror/GitLabReleases/group/tool")
        );
    }

    fn segment(raw: &str) -> String {
        raw.chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect()
    }

    #[quickcheck]
    fn prop_resolve_is_deterministic(owner: String, repo: String) -> bool {
        let (owner, repo) = (segment(&owner), segment(&repo));
        if owner.is_empty() || repo.is_empty() {
            return true;
        }
        let input = format!("gh:{}/{}", owner, repo);
        let first = Repository::resolve(&input).unwrap();
        let second = Repository::resolve(&input).unwrap();
        first == second && first.owner == owner && first.repo == repo
    }
}

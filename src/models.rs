//! Platform-neutral release model and run results.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;

/// A single downloadable file attached to a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// File name, unique within the release
    pub name: String,
    pub download_url: String,
    /// Size in bytes, 0 when the host doesn't report it
    pub size: u64,
    /// Lowercase hex sha256 supplied by the host API
    pub digest: Option<String>,
    /// Used as the local file's modification time
    pub updated_at: DateTime<Utc>,
}

/// A release as listed by the hosting platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Also the local directory name
    pub tag_name: String,
    pub name: String,
    pub draft: bool,
    pub prerelease: bool,
    pub published_at: DateTime<Utc>,
    pub assets: Vec<Asset>,
}

/// Quota snapshot read from a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    pub used: u64,
}

/// A file whose content does not match its known digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashMismatch {
    pub path: PathBuf,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for HashMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hash mismatch for {}: expected {}, got {}",
            self.path.display(),
            self.expected,
            self.actual
        )
    }
}

/// Outcome accumulator for one or more repositories
#[derive(Debug, Clone, Default)]
pub struct MirrorResult {
    pub downloaded: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub errors: Vec<String>,
    pub hash_mismatches: Vec<HashMismatch>,
    pub api_requests: u64,
}

impl MirrorResult {
    pub fn success(&self) -> bool {
        self.errors.is_empty() && self.hash_mismatches.is_empty()
    }

    /// Append another result, preserving order. Nothing is deduplicated.
    pub fn merge(&mut self, other: MirrorResult) {
        self.downloaded.extend(other.downloaded);
        self.skipped.extend(other.skipped);
        self.errors.extend(other.errors);
        self.hash_mismatches.extend(other.hash_mismatches);
        self.api_requests += other.api_requests;
    }
}

/// Release-count estimate for one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoEstimate {
    pub repository: String,
    pub release_count: u64,
    /// Listing requests a full mirror would need
    pub api_requests: u64,
}

/// Estimation-mode report for a batch of repositories
#[derive(Debug, Clone, Default)]
pub struct EstimateReport {
    pub repositories: Vec<RepoEstimate>,
    pub github_rate_limit: Option<RateLimitInfo>,
    pub gitlab_rate_limit: Option<RateLimitInfo>,
    /// Requests spent producing the estimate itself
    pub estimate_requests: u64,
}

impl EstimateReport {
    pub fn total_releases(&self) -> u64 {
        self.repositories.iter().map(|r| r.release_count).sum()
    }

    pub fn total_requests(&self) -> u64 {
        self.repositories.iter().map(|r| r.api_requests).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_requires_no_errors_or_mismatches() {
        let mut result = MirrorResult::default();
        assert!(result.success());

        result.downloaded.push("/tmp/a".into());
        result.skipped.push("/tmp/b".into());
        assert!(result.success());

        result.hash_mismatches.push(HashMismatch {
            path: "/tmp/c".into(),
            expected: "aa".into(),
            actual: "bb".into(),
        });
        assert!(!result.success());
    }

    #[test]
    fn test_merge_concatenates_in_order() {
        let mut total = MirrorResult {
            downloaded: vec!["/one".into()],
            errors: vec!["first".into()],
            api_requests: 2,
            ..Default::default()
        };
        let next = MirrorResult {
            downloaded: vec!["/one".into(), "/two".into()],
            errors: vec!["second".into()],
            api_requests: 3,
            ..Default::default()
        };

        total.merge(next);

        assert_eq!(
            total.downloaded,
            vec![PathBuf::from("/one"), "/one".into(), "/two".into()]
        );
        assert_eq!(total.errors, vec!["first", "second"]);
        assert_eq!(total.api_requests, 5);
        assert!(!total.success());
    }

    #[test]
    fn test_estimate_totals() {
        let report = EstimateReport {
            repositories: vec![
                RepoEstimate {
                    repository: "a/b".into(),
                    release_count: 250,
                    api_requests: 3,
                },
                RepoEstimate {
                    repository: "c/d".into(),
                    release_count: 1,
                    api_requests: 1,
                },
            ],
            estimate_requests: 2,
            ..Default::default()
        };
        assert_eq!(report.total_releases(), 251);
        assert_eq!(report.total_requests(), 4);
    }
}

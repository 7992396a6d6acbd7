//! release-mirror - Local mirrors of GitHub and GitLab release assets
//!
//! release-mirror keeps a local directory tree in sync with the published releases
//! of a list of repositories, verifying every file it can against a SHA-256 digest.
//!
//! ## Core Features
//!
//! - **Two Platforms**: GitHub (including Enterprise API roots) and GitLab, self-hosted or not
//! - **Integrity Checks**: API digests and published checksum manifests
//! - **Idempotent Runs**: Existing files are verified or skipped, never re-fetched
//! - **Rate Limit Aware**: Proactive throttling plus bounded retries with backoff
//! - **Cost Estimation**: Count the API requests a run would need before making it
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and command-line overrides
//! - [`repository`]: Repository identifiers and on-disk layout
//! - [`platform`]: GitHub and GitLab API adapters
//! - [`transport`]: Shared HTTP plumbing, rate limiting and retries
//! - [`checksum`]: Checksum manifest parsing and SHA-256 verification
//! - [`mirror`]: The synchronization engine

pub mod checksum;
pub mod config;
pub mod error;
pub mod mirror;
pub mod models;
pub mod platform;
pub mod report;
pub mod repository;
pub mod transport;

pub use config::{Config, ConfigOverrides};
pub use error::{MirrorError, Result};
pub use mirror::ReleaseMirror;
pub use models::{Asset, EstimateReport, HashMismatch, MirrorResult, RateLimitInfo, Release, RepoEstimate};
pub use platform::{create_client, ReleaseClient};
pub use report::{Reporter, TracingReporter};
pub use repository::{Platform, Repository};
pub use transport::RetryPolicy;

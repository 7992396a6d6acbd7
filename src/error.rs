//! Error taxonomy for mirror operations.
//!
//! Call sites branch on the variant to decide between retrying, sleeping until a
//! quota reset, recording a per-asset failure, or abandoning a repository.

use std::path::PathBuf;
use thiserror::Error;

use crate::models::HashMismatch;

/// Errors raised by the identity resolver, platform adapters, transport and engine.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Malformed repository identifier.
    #[error("{0}")]
    Identity(String),

    /// Repository or endpoint does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Authentication or permission failure.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Quota exhausted; `reset_at` is a unix timestamp in seconds.
    #[error("rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: i64 },

    /// 5xx response or connection-level failure, eligible for retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Any other non-success response.
    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },

    /// Response body did not have the expected shape.
    #[error("invalid response from {url}: {message}")]
    Decode { url: String, message: String },

    /// Content-integrity failure.
    #[error("{0}")]
    HashMismatch(HashMismatch),

    /// Malformed or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MirrorError {
    #[inline]
    pub fn identity(message: impl Into<String>) -> Self {
        Self::Identity(message.into())
    }

    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    #[inline]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the retrying wrappers should re-issue the request.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl From<reqwest::Error> for MirrorError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status.is_server_error() {
                return Self::Transient(format!("server error {}", status.as_u16()));
            }
            return Self::Api {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }

        // Walk the source chain so proxy failures are named as such
        let mut source = std::error::Error::source(&err);
        while let Some(inner) = source {
            if inner.to_string().to_lowercase().contains("proxy") {
                return Self::Transient(format!("proxy error: {}", err));
            }
            source = inner.source();
        }

        Self::Transient(err.to_string())
    }
}

/// Result type for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

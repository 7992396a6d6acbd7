//! Checksum manifests and file digests
//!
//! Release pages often ship `checksums.txt`, `SHA256SUMS` or per-file `.sha256`
//! sidecars instead of API-level digests. This module recognises those files,
//! parses them into a filename → digest map, and hashes local files for
//! verification.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{MirrorError, Result};
use crate::models::HashMismatch;

/// Filename → lowercase hex sha256
pub type ChecksumMap = HashMap<String, String>;

const HASH_BUFFER_SIZE: usize = 8192;

fn manifest_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)checksums?\.txt$",
            r"(?i)sha256sums?\.txt$",
            r"(?i)sha256sums?$",
            r"(?i)\.sha256(sum)?$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static checksum pattern"))
        .collect()
    })
}

fn hash_line() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| Regex::new(r"^([a-fA-F0-9]{64})\s+(.+)$").expect("static hash line"))
}

fn bare_hash() -> &'static Regex {
    static BARE: OnceLock<Regex> = OnceLock::new();
    BARE.get_or_init(|| Regex::new(r"^[a-fA-F0-9]{64}$").expect("static bare hash"))
}

fn sidecar_suffix() -> &'static Regex {
    static SUFFIX: OnceLock<Regex> = OnceLock::new();
    SUFFIX.get_or_init(|| Regex::new(r"(?i)\.sha256(sum)?$").expect("static sidecar suffix"))
}

/// Whether an asset name looks like a checksum manifest
pub fn is_checksum_file(name: &str) -> bool {
    manifest_patterns().iter().any(|p| p.is_match(name))
}

/// Parse manifest content into a filename → digest map.
///
/// Lines of the form `<hash>  <filename>` register `filename` (leading `*`, `.`,
/// `/` and `\` markers stripped). A line holding only a hash is attributed to
/// the file named by `sidecar_name` minus its `.sha256`/`.sha256sum` suffix.
pub fn parse_checksums(content: &str, sidecar_name: Option<&str>) -> ChecksumMap {
    let mut checksums = ChecksumMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(caps) = hash_line().captures(line) {
            let filename = caps[2].trim_start_matches(['*', '.', '/', '\\']);
            checksums.insert(filename.to_string(), caps[1].to_lowercase());
            continue;
        }

        if let Some(sidecar) = sidecar_name {
            if bare_hash().is_match(line) {
                let target = sidecar_suffix().replace(sidecar, "");
                if target != sidecar {
                    checksums.insert(target.into_owned(), line.to_lowercase());
                }
            }
        }
    }

    checksums
}

/// Normalize a digest to lowercase hex, rejecting anything that isn't a sha256
pub fn normalize_digest(raw: &str) -> Option<String> {
    let hex = raw.trim();
    if bare_hash().is_match(hex) {
        Some(hex.to_lowercase())
    } else {
        None
    }
}

/// Lowercase hex sha256 of a file's content
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| MirrorError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer).map_err(|e| MirrorError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Check a file against an expected digest
pub fn verify_file(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    if actual == expected {
        Ok(())
    } else {
        Err(MirrorError::HashMismatch(HashMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        }))
    }
}

/// [`verify_file`] on the blocking pool, for use from async code
pub async fn verify_file_async(path: &Path, expected: &str) -> Result<()> {
    let owned_path = path.to_path_buf();
    let expected = expected.to_string();

    tokio::task::spawn_blocking(move || verify_file(&owned_path, &expected))
        .await
        .map_err(|e| MirrorError::io(path, std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

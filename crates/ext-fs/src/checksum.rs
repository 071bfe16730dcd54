//! SHA-256 checksum utilities
//!
//! Provides a single canonical checksum format (`sha256:<hex>`) used to verify
//! downloaded extension archives against their catalog entries.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Prefix for all checksums produced by this module
const PREFIX: &str = "sha256:";

/// Compute the SHA-256 checksum of raw bytes.
///
/// Returns a string in the canonical format `"sha256:<hex>"`.
pub fn compute_bytes_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{}{:x}", PREFIX, hasher.finalize())
}

/// Compute the SHA-256 checksum of a file's contents.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn compute_file_checksum(path: &Path) -> std::io::Result<String> {
    let content = std::fs::read(path)?;
    Ok(compute_bytes_checksum(&content))
}

/// Compare a computed checksum with an expected one.
///
/// The expected value may omit the `sha256:` prefix and is compared
/// case-insensitively.
pub fn matches(expected: &str, actual: &str) -> bool {
    let expected = expected.strip_prefix(PREFIX).unwrap_or(expected);
    let actual = actual.strip_prefix(PREFIX).unwrap_or(actual);
    expected.eq_ignore_ascii_case(actual)
}

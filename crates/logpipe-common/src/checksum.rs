//! Checksum utilities for content-addressed staged files

use crate::error::{CommonError, Result};
use sha2::{Digest, Sha256};

/// Shortest digest prefix accepted by [`verify_sha256_prefix`]
pub const MIN_DIGEST_PREFIX_LEN: usize = 8;

/// Hex-encoded SHA-256 of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Verify that the SHA-256 of `data` starts with `expected` (case-insensitive hex).
///
/// `expected` may be the full digest or a prefix of at least
/// [`MIN_DIGEST_PREFIX_LEN`] characters.
pub fn verify_sha256_prefix(data: &[u8], expected: &str) -> Result<()> {
    let actual = sha256_hex(data);
    let matches = expected.len() >= MIN_DIGEST_PREFIX_LEN
        && expected.len() <= actual.len()
        && actual[..expected.len()].eq_ignore_ascii_case(expected);

    if matches {
        Ok(())
    } else {
        Err(CommonError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

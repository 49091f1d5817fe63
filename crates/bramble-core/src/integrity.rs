//! Subresource integrity (SRI) strings.
//!
//! An SRI string is one or more whitespace-separated tokens of the form
//! `algorithm-base64(hash)[?option=value]`. Registry packuments carry
//! these in `dist.integrity`; downloaded tarball bytes are checked
//! against them before extraction.

use crate::error::PmError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Supported hash algorithms, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Algorithm {
    Sha512,
    Sha384,
    Sha256,
    Sha1,
}

/// Strongest-first algorithm preference order.
pub const ALGORITHMS: [Algorithm; 4] = [
    Algorithm::Sha512,
    Algorithm::Sha384,
    Algorithm::Sha256,
    Algorithm::Sha1,
];

impl Algorithm {
    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha512 => "sha512",
            Self::Sha384 => "sha384",
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
        }
    }

    /// Parse an algorithm name, tolerating case.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha512" => Some(Self::Sha512),
            "sha384" => Some(Self::Sha384),
            "sha256" => Some(Self::Sha256),
            "sha1" => Some(Self::Sha1),
            _ => None,
        }
    }

    fn digest(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha512 => Sha512::digest(bytes).to_vec(),
            Self::Sha384 => Sha384::digest(bytes).to_vec(),
            Self::Sha256 => Sha256::digest(bytes).to_vec(),
            Self::Sha1 => Sha1::digest(bytes).to_vec(),
        }
    }
}

/// Compute an SRI token for `bytes` with the given algorithm name.
///
/// # Errors
/// Returns `UNSUPPORTED_ALGORITHM` for algorithms outside the supported
/// set.
pub fn calculate(bytes: &[u8], algo: &str) -> Result<String, PmError> {
    let algorithm = Algorithm::parse(algo).ok_or_else(|| PmError::unsupported_algorithm(algo))?;
    Ok(format!(
        "{}-{}",
        algorithm.as_str(),
        BASE64.encode(algorithm.digest(bytes))
    ))
}

/// Verify `bytes` against an SRI string.
///
/// Tokens for unsupported algorithms are discarded; the check passes if
/// any remaining token matches. An empty or all-unsupported integrity
/// string never verifies.
#[must_use]
pub fn verify(bytes: &[u8], integrity: &str) -> bool {
    for (algorithm, expected) in parse_tokens(integrity) {
        let Ok(expected_bytes) = BASE64.decode(expected) else {
            continue;
        };
        let actual = algorithm.digest(bytes);
        if constant_time_eq(&actual, &expected_bytes) {
            return true;
        }
    }
    false
}

/// The strongest supported algorithm present in an SRI string.
#[must_use]
pub fn strongest(integrity: &str) -> Option<Algorithm> {
    let present: Vec<Algorithm> = parse_tokens(integrity).map(|(a, _)| a).collect();
    ALGORITHMS.into_iter().find(|a| present.contains(a))
}

/// Parse SRI tokens, skipping malformed or unsupported entries.
/// `?option=value` suffixes are stripped.
fn parse_tokens(integrity: &str) -> impl Iterator<Item = (Algorithm, &str)> {
    integrity.split_whitespace().filter_map(|token| {
        let (algo, rest) = token.split_once('-')?;
        let algorithm = Algorithm::parse(algo)?;
        let hash = rest.split('?').next().unwrap_or(rest);
        if hash.is_empty() {
            return None;
        }
        Some((algorithm, hash))
    })
}

/// Compare digests without an early exit on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

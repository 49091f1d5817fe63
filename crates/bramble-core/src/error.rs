//! Error types for the bramble core.

use std::fmt;
use std::io;

/// Stable error codes.
pub mod codes {
    pub const INVALID_VERSION: &str = "INVALID_VERSION";
    pub const UNSUPPORTED_ALGORITHM: &str = "UNSUPPORTED_ALGORITHM";
    pub const INTEGRITY_MISMATCH: &str = "INTEGRITY_MISMATCH";
    pub const PACKAGE_NOT_FOUND: &str = "PACKAGE_NOT_FOUND";
    pub const REGISTRY_ERROR: &str = "REGISTRY_ERROR";
    pub const RESOLVE_ERROR: &str = "RESOLVE_ERROR";
    pub const PLACEMENT_CONFLICT: &str = "PLACEMENT_CONFLICT";
    pub const LOCKFILE_ERROR: &str = "LOCKFILE_ERROR";
    pub const FS_ERROR: &str = "FS_ERROR";
    pub const MANIFEST_ERROR: &str = "MANIFEST_ERROR";
    pub const SPEC_INVALID: &str = "SPEC_INVALID";
}

/// Package manager error.
///
/// Carries a stable code for machine handling plus a human-readable
/// message with the package name and requested range where applicable.
#[derive(Debug, Clone)]
pub struct PmError {
    code: &'static str,
    message: String,
}

impl PmError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Create an invalid version error.
    pub fn invalid_version(version: impl Into<String>) -> Self {
        Self::new(
            codes::INVALID_VERSION,
            format!("Invalid version: {}", version.into()),
        )
    }

    /// Create an unsupported hash algorithm error.
    pub fn unsupported_algorithm(algo: impl Into<String>) -> Self {
        Self::new(
            codes::UNSUPPORTED_ALGORITHM,
            format!("Unsupported hash algorithm: {}", algo.into()),
        )
    }

    /// Create an integrity mismatch error.
    #[must_use]
    pub fn integrity_mismatch(name: &str, version: &str) -> Self {
        Self::new(
            codes::INTEGRITY_MISMATCH,
            format!(
                "Integrity check failed for {name}@{version}; try clearing the cache and rerunning the install"
            ),
        )
    }

    /// Create a package not found error.
    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::new(codes::PACKAGE_NOT_FOUND, format!("Package not found: {name}"))
    }

    /// Create a registry error.
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(codes::REGISTRY_ERROR, msg)
    }

    /// Create a resolution failure for a name/range pair.
    #[must_use]
    pub fn resolve(name: &str, range: &str, detail: &str) -> Self {
        Self::new(
            codes::RESOLVE_ERROR,
            format!("Could not resolve {name}@{range}: {detail}"),
        )
    }

    /// Create a placement conflict error naming the conflicting package.
    #[must_use]
    pub fn conflict(name: &str, range: &str, existing_name: &str, existing_version: &str) -> Self {
        Self::new(
            codes::PLACEMENT_CONFLICT,
            format!(
                "Cannot place {name}@{range}: conflicts with {existing_name}@{existing_version}"
            ),
        )
    }

    /// Create a lockfile error.
    pub fn lockfile(msg: impl Into<String>) -> Self {
        Self::new(codes::LOCKFILE_ERROR, msg)
    }

    /// Create a filesystem error.
    pub fn fs(msg: impl Into<String>) -> Self {
        Self::new(codes::FS_ERROR, msg)
    }

    /// Create a manifest error.
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::new(codes::MANIFEST_ERROR, msg)
    }

    /// Create an invalid package spec error.
    pub fn spec_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::SPEC_INVALID, msg)
    }

    /// Whether this error may be swallowed when the requesting edge is
    /// optional.
    #[must_use]
    pub fn tolerable_for_optional(&self) -> bool {
        matches!(
            self.code,
            codes::PACKAGE_NOT_FOUND
                | codes::REGISTRY_ERROR
                | codes::RESOLVE_ERROR
                | codes::PLACEMENT_CONFLICT
        )
    }
}

impl fmt::Display for PmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PmError {}

impl From<io::Error> for PmError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::FS_ERROR, e.to_string())
    }
}

impl From<reqwest::Error> for PmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::new(codes::REGISTRY_ERROR, format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::new(codes::REGISTRY_ERROR, format!("Connection failed: {e}"))
        } else {
            Self::new(codes::REGISTRY_ERROR, e.to_string())
        }
    }
}

impl From<serde_json::Error> for PmError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(codes::REGISTRY_ERROR, format!("Invalid JSON: {e}"))
    }
}

//! Runtime configuration for bramble.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Environment variable to override the registry URL.
pub const REGISTRY_ENV: &str = "BRAMBLE_NPM_REGISTRY";

/// Default packument cache TTL in seconds. Zero disables expiry.
pub const DEFAULT_PACKUMENT_TTL_SECS: u64 = 300;

/// Default concurrency for packument fan-out.
pub const DEFAULT_PACKUMENT_CONCURRENCY: usize = 10;

/// Default concurrency for tarball fan-out.
pub const DEFAULT_TARBALL_CONCURRENCY: usize = 5;

/// Which dependency map an added spec is saved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SaveKind {
    /// `dependencies`.
    #[default]
    Prod,
    /// `devDependencies`.
    Dev,
    /// `optionalDependencies`.
    Optional,
    /// `peerDependencies`.
    Peer,
}

/// Lockfile version emitted on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LockfileVersion {
    V1,
    V2,
    #[default]
    V3,
}

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project root (directory containing package.json).
    pub cwd: PathBuf,

    /// Base registry URL for packument and tarball fetches.
    pub registry: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Packument cache TTL in seconds (0 = never expire).
    pub packument_ttl_secs: u64,

    /// Concurrency ceiling for packument fan-out.
    pub packument_concurrency: usize,

    /// Concurrency ceiling for tarball fan-out.
    pub tarball_concurrency: usize,

    /// Write back a modified root manifest after add/remove.
    pub save: bool,

    /// Destination dep-map for saved specs.
    pub save_kind: SaveKind,

    /// Lockfile version written for fresh lockfiles.
    pub lockfile_version: LockfileVersion,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            registry: registry_from_env(),
            request_timeout_secs: 15,
            packument_ttl_secs: DEFAULT_PACKUMENT_TTL_SECS,
            packument_concurrency: DEFAULT_PACKUMENT_CONCURRENCY,
            tarball_concurrency: DEFAULT_TARBALL_CONCURRENCY,
            save: true,
            save_kind: SaveKind::default(),
            lockfile_version: LockfileVersion::default(),
        }
    }
}

impl Config {
    /// Create a new config rooted at the given directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set the registry URL.
    #[must_use]
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Set the save destination.
    #[must_use]
    pub fn with_save_kind(mut self, kind: SaveKind) -> Self {
        self.save_kind = kind;
        self
    }

    /// Suppress manifest write-back.
    #[must_use]
    pub fn with_no_save(mut self) -> Self {
        self.save = false;
        self
    }

    /// Set the lockfile version written on output.
    #[must_use]
    pub fn with_lockfile_version(mut self, version: LockfileVersion) -> Self {
        self.lockfile_version = version;
        self
    }
}

/// Resolve the effective registry URL: `.npmrc` `registry=` line in the
/// project root, then the environment override, then the default.
#[must_use]
pub fn effective_registry(cwd: &std::path::Path) -> String {
    let npmrc = cwd.join(".npmrc");
    if let Ok(content) = std::fs::read_to_string(&npmrc) {
        if let Some(url) = registry_from_npmrc(&content) {
            return url;
        }
    }
    registry_from_env()
}

fn registry_from_env() -> String {
    std::env::var(REGISTRY_ENV).unwrap_or_else(|_| DEFAULT_REGISTRY.to_string())
}

/// Extract a `registry=URL` directive from `.npmrc` content.
///
/// Comments (`#`, `;`) and blank lines are ignored; the last directive wins.
#[must_use]
pub fn registry_from_npmrc(content: &str) -> Option<String> {
    let mut found = None;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "registry" {
                let value = value.trim();
                if !value.is_empty() {
                    // Trailing slash keeps Url::join from eating the last path
                    // segment.
                    found = Some(if value.ends_with('/') {
                        value.to_string()
                    } else {
                        format!("{value}/")
                    });
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.packument_concurrency, 10);
        assert_eq!(config.tarball_concurrency, 5);
        assert_eq!(config.packument_ttl_secs, 300);
        assert!(config.save);
        assert_eq!(config.save_kind, SaveKind::Prod);
        assert_eq!(config.lockfile_version, LockfileVersion::V3);
    }

    #[test]
    fn test_registry_from_npmrc() {
        let content = "# comment\nregistry=https://mirror.example.com/npm\n";
        assert_eq!(
            registry_from_npmrc(content),
            Some("https://mirror.example.com/npm/".to_string())
        );
    }

    #[test]
    fn test_registry_from_npmrc_last_wins() {
        let content = "registry=https://a.example/\nregistry=https://b.example/\n";
        assert_eq!(
            registry_from_npmrc(content),
            Some("https://b.example/".to_string())
        );
    }

    #[test]
    fn test_registry_from_npmrc_absent() {
        assert_eq!(registry_from_npmrc("; nothing here\n"), None);
        assert_eq!(registry_from_npmrc("@scope:registry=https://x/\n"), None);
    }
}

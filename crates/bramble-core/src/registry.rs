//! npm registry client.
//!
//! Read-only HTTP access to a registry: packuments (package metadata
//! documents) and artifact tarballs, with bounded parallel fan-out and a
//! process-local packument cache.

use crate::error::PmError;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use url::Url;

/// Accept header requesting the slim install packument.
pub const PACKUMENT_ACCEPT: &str = "application/vnd.npm.install-v1+json";

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

/// Something that can produce packuments. The registry client is the real
/// implementation; tests substitute a fixture-backed one so the builder
/// runs without network.
#[allow(async_fn_in_trait)]
pub trait PackumentSource {
    /// Fetch the packument for a package name.
    async fn packument(&self, name: &str) -> Result<Arc<Value>, PmError>;
}

/// Something that can produce tarball bytes for a resolved URL.
#[allow(async_fn_in_trait)]
pub trait TarballSource {
    /// Fetch the tarball at `url`.
    async fn tarball(&self, url: &str) -> Result<Bytes, PmError>;
}

struct CacheEntry {
    packument: Arc<Value>,
    fetched_at: Instant,
}

/// Registry client for fetching package metadata and tarballs.
pub struct RegistryClient {
    base_url: Url,
    http: Client,
    cache: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl RegistryClient {
    /// Create a new registry client.
    ///
    /// `ttl_secs` bounds packument cache entries; zero disables expiry.
    ///
    /// # Errors
    /// Returns `REGISTRY_ERROR` if the URL is invalid or the HTTP client
    /// cannot be created.
    pub fn new(base_url: &str, timeout_secs: u64, ttl_secs: u64) -> Result<Self, PmError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PmError::registry(format!("Invalid registry URL '{base_url}': {e}")))?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("bramble/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PmError::registry(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            http,
            cache: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_secs),
        })
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn cache_get(&self, name: &str) -> Option<Arc<Value>> {
        let cache = self.cache.lock().expect("packument cache poisoned");
        let entry = cache.get(name)?;
        if !self.ttl.is_zero() && entry.fetched_at.elapsed() > self.ttl {
            return None;
        }
        Some(Arc::clone(&entry.packument))
    }

    fn cache_put(&self, name: &str, packument: Arc<Value>) {
        let mut cache = self.cache.lock().expect("packument cache poisoned");
        cache.insert(
            name.to_string(),
            CacheEntry {
                packument,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Fetch the packument for a package, consulting the cache first.
    ///
    /// # Errors
    /// `PACKAGE_NOT_FOUND` on 404, `REGISTRY_ERROR` on any other HTTP or
    /// JSON failure.
    pub async fn fetch_packument(&self, name: &str) -> Result<Arc<Value>, PmError> {
        if let Some(cached) = self.cache_get(name) {
            return Ok(cached);
        }

        let url = self
            .base_url
            .join(&url_encode_name(name))
            .map_err(|e| PmError::registry(format!("Failed to build URL for '{name}': {e}")))?;

        let response = self
            .http
            .get(url.as_str())
            .header("Accept", PACKUMENT_ACCEPT)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PmError::not_found(name));
        }
        if !response.status().is_success() {
            return Err(PmError::registry(format!(
                "Registry returned status {} for '{name}'",
                response.status()
            )));
        }

        let json: Value = response.json().await?;
        let packument = Arc::new(json);
        self.cache_put(name, Arc::clone(&packument));
        Ok(packument)
    }

    /// Fetch many packuments through a bounded worker pool.
    ///
    /// Per-name failures are collected; the call only fails outright when
    /// every requested packument failed.
    ///
    /// # Errors
    /// Returns `REGISTRY_ERROR` when all names fail.
    pub async fn fetch_packuments_parallel(
        &self,
        names: &[String],
        concurrency: usize,
    ) -> Result<PackumentBatch, PmError> {
        let results: Vec<(String, Result<Arc<Value>, PmError>)> = stream::iter(names.to_vec())
            .map(|name| async move {
                let result = self.fetch_packument(&name).await;
                (name, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut batch = PackumentBatch::default();
        for (name, result) in results {
            match result {
                Ok(packument) => {
                    batch.packuments.insert(name, packument);
                }
                Err(e) => {
                    batch.failures.insert(name, e);
                }
            }
        }

        if !names.is_empty() && batch.packuments.is_empty() {
            let detail: Vec<String> = batch
                .failures
                .iter()
                .map(|(n, e)| format!("{n}: {e}"))
                .collect();
            return Err(PmError::registry(format!(
                "All packument fetches failed: {}",
                detail.join("; ")
            )));
        }
        Ok(batch)
    }

    /// Download a tarball into memory.
    ///
    /// # Errors
    /// Returns `REGISTRY_ERROR` on a non-2xx status or oversized body.
    pub async fn fetch_tarball(&self, url: &str) -> Result<Bytes, PmError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PmError::registry(format!("Failed to download '{url}': {e}")))?;

        if !response.status().is_success() {
            return Err(PmError::registry(format!(
                "Download failed with status {} for '{url}'",
                response.status()
            )));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_TARBALL_SIZE {
                return Err(PmError::registry(format!(
                    "Tarball too large: {len} bytes (max: {MAX_TARBALL_SIZE})"
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PmError::registry(format!("Failed to read response body: {e}")))?;

        if bytes.len() as u64 > MAX_TARBALL_SIZE {
            return Err(PmError::registry(format!(
                "Tarball too large: {} bytes (max: {MAX_TARBALL_SIZE})",
                bytes.len()
            )));
        }

        Ok(bytes)
    }

    /// Download many tarballs through a bounded worker pool.
    ///
    /// In contrast to packuments, any failure aborts the whole batch:
    /// optional-dependency tolerance lives at the caller, before this
    /// point.
    ///
    /// # Errors
    /// Returns `REGISTRY_ERROR` naming every failed id.
    pub async fn fetch_tarballs_parallel(
        &self,
        urls: &BTreeMap<String, String>,
        concurrency: usize,
    ) -> Result<BTreeMap<String, Bytes>, PmError> {
        let entries: Vec<(String, String)> =
            urls.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        let results: Vec<(String, Result<Bytes, PmError>)> = stream::iter(entries)
            .map(|(id, url)| async move {
                let result = self.fetch_tarball(&url).await;
                (id, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut out = BTreeMap::new();
        let mut failures: Vec<String> = Vec::new();
        for (id, result) in results {
            match result {
                Ok(bytes) => {
                    out.insert(id, bytes);
                }
                Err(e) => failures.push(format!("{id}: {e}")),
            }
        }

        if !failures.is_empty() {
            failures.sort();
            return Err(PmError::registry(format!(
                "Tarball downloads failed: {}",
                failures.join("; ")
            )));
        }
        Ok(out)
    }
}

impl PackumentSource for RegistryClient {
    async fn packument(&self, name: &str) -> Result<Arc<Value>, PmError> {
        self.fetch_packument(name).await
    }
}

impl TarballSource for RegistryClient {
    async fn tarball(&self, url: &str) -> Result<Bytes, PmError> {
        self.fetch_tarball(url).await
    }
}

/// Result of a packument fan-out.
#[derive(Debug, Default)]
pub struct PackumentBatch {
    /// Successfully fetched packuments by name.
    pub packuments: BTreeMap<String, Arc<Value>>,
    /// Per-name failures.
    pub failures: BTreeMap<String, PmError>,
}

/// URL-encode a package name for registry requests; scoped names encode
/// the slash.
#[must_use]
pub fn url_encode_name(name: &str) -> String {
    if name.starts_with('@') {
        name.replace('/', "%2F")
    } else {
        name.to_string()
    }
}

/// All version strings present in a packument.
#[must_use]
pub fn get_versions(packument: &Value) -> Vec<&str> {
    packument
        .get("versions")
        .and_then(|v| v.as_object())
        .map(|obj| obj.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

/// Look up a dist-tag (e.g. `latest`).
#[must_use]
pub fn get_dist_tag<'a>(packument: &'a Value, tag: &str) -> Option<&'a str> {
    packument.get("dist-tags")?.get(tag)?.as_str()
}

/// The per-version metadata object for a specific version.
#[must_use]
pub fn version_data<'a>(packument: &'a Value, version: &str) -> Option<&'a Value> {
    packument.get("versions")?.get(version)
}

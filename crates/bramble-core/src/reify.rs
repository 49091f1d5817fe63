//! Reification: make the on-disk tree match the ideal tree.
//!
//! Four phases over the actual/ideal diff: remove, prepare updates,
//! parallel download, install (verify + extract), then bin links. All
//! version decisions were made by the builder; the reifier only moves
//! bytes.

use crate::error::PmError;
use crate::integrity;
use crate::lock::{self, LockEntry, Lockfile};
use crate::manifest::Manifest;
use crate::registry::{version_data, PackumentSource, TarballSource};
use crate::writer;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// What a reify run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReifyReport {
    pub removed: usize,
    pub updated: usize,
    pub added: usize,
    pub bins_linked: usize,
}

/// Per-phase progress callback: `(message, processed, total)`.
pub type ProgressFn<'a> = &'a dyn Fn(&str, usize, usize);

/// No-op progress reporter.
pub fn no_progress(_: &str, _: usize, _: usize) {}

/// Transform the installed state described by `actual` into the state
/// described by `ideal`.
///
/// Tarball URLs come from each entry's stored `resolved`, falling back
/// to a packument lookup. Any failed download in the scheduled set is
/// fatal; callers filter optional packages out of the ideal tree before
/// this point.
///
/// # Errors
/// `REGISTRY_ERROR` on download failure, `INTEGRITY_MISMATCH` on SRI
/// verification failure, `FS_ERROR` on extraction/link failure.
pub async fn reify<T: TarballSource, P: PackumentSource>(
    root: &Path,
    ideal: &Lockfile,
    actual: &Lockfile,
    tarballs: &T,
    packuments: &P,
    concurrency: usize,
    progress: ProgressFn<'_>,
) -> Result<ReifyReport, PmError> {
    let diff = lock::diff(actual, ideal);
    let mut report = ReifyReport::default();

    // Phase 1: removals.
    let total = diff.remove.len();
    for (i, location) in diff.remove.iter().enumerate() {
        remove_installed(root, actual.packages.get(location), location)?;
        report.removed += 1;
        progress("remove", i + 1, total);
    }

    // Phase 2: clear old versions of updated packages.
    let total = diff.update.len();
    for (i, (location, _, _)) in diff.update.iter().enumerate() {
        remove_installed(root, actual.packages.get(location), location)?;
        progress("prepare", i + 1, total);
    }

    // Phase 3: parallel downloads for add ∪ update.
    let mut targets: Vec<String> = diff.add.clone();
    targets.extend(diff.update.iter().map(|(loc, _, _)| loc.clone()));
    targets.sort();

    let mut urls: BTreeMap<String, String> = BTreeMap::new();
    for location in &targets {
        let entry = ideal
            .packages
            .get(location)
            .ok_or_else(|| PmError::fs(format!("Ideal tree has no entry for {location}")))?;
        let url = match &entry.resolved {
            Some(url) => url.clone(),
            None => lookup_tarball_url(packuments, location, entry).await?,
        };
        urls.insert(location.clone(), url);
    }

    let total = urls.len();
    let mut downloads: BTreeMap<String, Bytes> = BTreeMap::new();
    let mut failures: Vec<String> = Vec::new();
    {
        let mut stream = stream::iter(urls.iter())
            .map(|(location, url)| async move {
                let result = tarballs.tarball(url).await;
                (location.clone(), result)
            })
            .buffer_unordered(concurrency.max(1));

        let mut done = 0;
        while let Some((location, result)) = stream.next().await {
            done += 1;
            progress("download", done, total);
            match result {
                Ok(bytes) => {
                    downloads.insert(location, bytes);
                }
                Err(e) => failures.push(format!("{location}: {e}")),
            }
        }
    }
    if !failures.is_empty() {
        failures.sort();
        return Err(PmError::registry(format!(
            "Failed to download packages: {}",
            failures.join("; ")
        )));
    }

    // Phase 4: verify and install, shallowest first so parents exist.
    let total = downloads.len();
    for (i, (location, bytes)) in downloads.iter().enumerate() {
        let entry = &ideal.packages[location];
        if let Some(sri) = entry.integrity.as_deref().filter(|s| !s.is_empty()) {
            if !integrity::verify(bytes, sri) {
                let name = display_name(location, entry);
                return Err(PmError::integrity_mismatch(
                    &name,
                    entry.version.as_deref().unwrap_or("unknown"),
                ));
            }
        }
        writer::write_node(root, location, bytes)?;
        progress("install", i + 1, total);
    }
    report.added = diff.add.len();
    report.updated = diff.update.len();

    // Phase 5: bin links across the final tree.
    let with_bins: Vec<(&String, &LockEntry)> = ideal
        .packages
        .iter()
        .filter(|(loc, e)| !loc.is_empty() && e.bin.is_some())
        .collect();
    let total = with_bins.len();
    for (i, (location, entry)) in with_bins.iter().enumerate() {
        let name = display_name(location, entry);
        let manifest = Manifest {
            bin: entry
                .bin
                .as_ref()
                .and_then(|b| serde_json::from_value(b.clone()).ok()),
            ..Default::default()
        };
        let created = writer::create_bin_links(root, location, &name, &manifest)?;
        report.bins_linked += created.len();
        progress("link", i + 1, total);
    }

    debug!(
        removed = report.removed,
        updated = report.updated,
        added = report.added,
        bins = report.bins_linked,
        "reify complete"
    );
    Ok(report)
}

/// Remove a package directory plus its bin shims.
fn remove_installed(
    root: &Path,
    entry: Option<&LockEntry>,
    location: &str,
) -> Result<(), PmError> {
    if let Some(entry) = entry {
        if let Some(bin) = &entry.bin {
            let name = display_name(location, entry);
            writer::remove_bin_links(root, &writer::bin_names(&name, bin))?;
        }
    }
    writer::remove_node(root, location)
}

fn display_name(location: &str, entry: &LockEntry) -> String {
    entry.name.clone().unwrap_or_else(|| {
        lock::split_location(location)
            .map(|(_, name)| name)
            .unwrap_or_else(|| location.to_string())
    })
}

/// Fetch the tarball URL for an entry lacking a stored `resolved`.
async fn lookup_tarball_url<P: PackumentSource>(
    packuments: &P,
    location: &str,
    entry: &LockEntry,
) -> Result<String, PmError> {
    let name = display_name(location, entry);
    let version = entry
        .version
        .as_deref()
        .ok_or_else(|| PmError::fs(format!("No version recorded for {location}")))?;
    let packument = packuments.packument(&name).await?;
    version_data(&packument, version)
        .and_then(|d| d.get("dist"))
        .and_then(|d| d.get("tarball"))
        .and_then(|t| t.as_str())
        .map(String::from)
        .ok_or_else(|| {
            PmError::registry(format!("No tarball URL for {name}@{version}"))
        })
}

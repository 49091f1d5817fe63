//! High-level operations: install, clean-install, add, remove, update,
//! list.
//!
//! Each operation wires the same pipeline: read the root manifest, seed
//! a virtual tree from the lockfile, build the ideal tree, persist the
//! lockfile, diff against the actual state, reify.

use crate::builder::build_ideal_tree;
use crate::config::{Config, LockfileVersion, SaveKind};
use crate::error::PmError;
use crate::lock::{self, LockFormat, LoadedLockfile, Lockfile};
use crate::manifest::{self, PackageArg};
use crate::registry::{PackumentSource, RegistryClient, TarballSource};
use crate::reify::{reify, ProgressFn, ReifyReport};
use crate::tree::{EdgeKind, Tree};
use crate::{actual, builder};
use std::path::PathBuf;
use tracing::{debug, info};

/// Result of an install-like operation.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub report: ReifyReport,
    /// Path the project lockfile was written to.
    pub lockfile_path: PathBuf,
    /// Packages in the ideal tree (root excluded).
    pub package_count: usize,
    /// True when the tree was already current and reification was
    /// skipped.
    pub up_to_date: bool,
}

fn registry_client(config: &Config) -> Result<RegistryClient, PmError> {
    RegistryClient::new(
        &config.registry,
        config.request_timeout_secs,
        config.packument_ttl_secs,
    )
}

/// Install dependencies per the root manifest and lockfile.
///
/// # Errors
/// Any resolution, placement, lockfile, or reify failure.
pub async fn install(config: &Config, progress: ProgressFn<'_>) -> Result<InstallOutcome, PmError> {
    let registry = registry_client(config)?;
    install_with(config, &registry, progress).await
}

/// [`install`] with an explicit fetcher, for driving the pipeline
/// without a live registry.
pub async fn install_with<S: PackumentSource + TarballSource>(
    config: &Config,
    fetcher: &S,
    progress: ProgressFn<'_>,
) -> Result<InstallOutcome, PmError> {
    let loaded = lock::load(&config.cwd)?;
    run_pipeline(config, fetcher, loaded, None, &[], progress).await
}

/// Clean install: require a lockfile, wipe `node_modules`, reinstall.
///
/// # Errors
/// `LOCKFILE_ERROR` when no lockfile is present, plus anything
/// [`install`] raises.
pub async fn clean_install(
    config: &Config,
    progress: ProgressFn<'_>,
) -> Result<InstallOutcome, PmError> {
    let registry = registry_client(config)?;
    clean_install_with(config, &registry, progress).await
}

/// [`clean_install`] with an explicit fetcher.
pub async fn clean_install_with<S: PackumentSource + TarballSource>(
    config: &Config,
    fetcher: &S,
    progress: ProgressFn<'_>,
) -> Result<InstallOutcome, PmError> {
    let loaded = lock::load(&config.cwd)?;
    if loaded.is_none() {
        return Err(PmError::lockfile(
            "Clean install requires a lockfile (package-lock.json, npm-shrinkwrap.json, or yarn.lock)",
        ));
    }
    bramble_util::fs::remove_dir_all_if_exists(&config.cwd.join("node_modules"))
        .map_err(|e| PmError::fs(format!("Failed to clear node_modules: {e}")))?;
    run_pipeline(config, fetcher, loaded, None, &[], progress).await
}

/// Add packages: resolve, record in the manifest (honoring the save
/// flags), then install.
///
/// # Errors
/// `SPEC_INVALID` for malformed specs, plus anything [`install`] raises.
pub async fn add(
    config: &Config,
    specs: &[String],
    progress: ProgressFn<'_>,
) -> Result<InstallOutcome, PmError> {
    let registry = registry_client(config)?;
    add_with(config, &registry, specs, progress).await
}

/// [`add`] with an explicit fetcher.
pub async fn add_with<S: PackumentSource + TarballSource>(
    config: &Config,
    fetcher: &S,
    specs: &[String],
    progress: ProgressFn<'_>,
) -> Result<InstallOutcome, PmError> {
    let mut additions: Vec<(String, String)> = Vec::new();
    for raw in specs {
        let arg = PackageArg::parse(raw)?;
        let spec = match arg.spec {
            Some(spec) => spec,
            None => {
                // No range given: resolve the latest version and save a
                // caret range on it.
                let packument = fetcher.packument(&arg.name).await?;
                let version = builder::pick_version(&packument, "latest")
                    .ok_or_else(|| PmError::resolve(&arg.name, "latest", "no versions published"))?;
                format!("^{version}")
            }
        };
        additions.push((arg.name, spec));
    }

    if config.save {
        for (name, spec) in &additions {
            manifest::add_dependency(&config.cwd, name, spec, config.save_kind)?;
        }
        info!(count = additions.len(), "recorded added packages in package.json");
    }

    let loaded = lock::load(&config.cwd)?;
    // With --no-save the manifest stays untouched; the new edges are
    // injected into the in-memory tree instead.
    let extra = if config.save { Vec::new() } else { additions };
    run_pipeline(config, fetcher, loaded, None, &extra, progress).await
}

/// Remove packages from the manifest and the tree.
///
/// # Errors
/// Anything [`install`] raises.
pub async fn remove(
    config: &Config,
    names: &[String],
    progress: ProgressFn<'_>,
) -> Result<InstallOutcome, PmError> {
    let registry = registry_client(config)?;
    remove_with(config, &registry, names, progress).await
}

/// [`remove`] with an explicit fetcher.
pub async fn remove_with<S: PackumentSource + TarballSource>(
    config: &Config,
    fetcher: &S,
    names: &[String],
    progress: ProgressFn<'_>,
) -> Result<InstallOutcome, PmError> {
    if config.save {
        for name in names {
            let removed = manifest::remove_dependency(&config.cwd, name)?;
            if !removed {
                debug!(name = %name, "remove: not a declared dependency");
            }
        }
    }
    let loaded = lock::load(&config.cwd)?;
    run_pipeline(config, fetcher, loaded, None, &[], progress).await
}

/// Update named packages (or everything, with an empty list) to the
/// newest satisfying versions.
///
/// # Errors
/// Anything [`install`] raises.
pub async fn update(
    config: &Config,
    names: &[String],
    progress: ProgressFn<'_>,
) -> Result<InstallOutcome, PmError> {
    let registry = registry_client(config)?;
    update_with(config, &registry, names, progress).await
}

/// [`update`] with an explicit fetcher.
pub async fn update_with<S: PackumentSource + TarballSource>(
    config: &Config,
    fetcher: &S,
    names: &[String],
    progress: ProgressFn<'_>,
) -> Result<InstallOutcome, PmError> {
    let loaded = lock::load(&config.cwd)?;
    run_pipeline(config, fetcher, loaded, Some(names), &[], progress).await
}

/// One installed package, for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedPackage {
    pub location: String,
    pub name: String,
    pub version: String,
    pub depth: usize,
}

/// List installed packages from the actual on-disk tree, shallowest
/// first.
#[must_use]
pub fn list(config: &Config) -> Vec<ListedPackage> {
    let actual = actual::load_actual(&config.cwd);
    let mut out: Vec<ListedPackage> = actual
        .packages
        .iter()
        .filter(|(loc, _)| !loc.is_empty())
        .map(|(location, entry)| {
            let folder = lock::split_location(location)
                .map(|(_, name)| name)
                .unwrap_or_default();
            ListedPackage {
                location: location.clone(),
                name: entry.name.clone().unwrap_or(folder),
                version: entry.version.clone().unwrap_or_default(),
                depth: location.matches("/node_modules/").count(),
            }
        })
        .collect();
    out.sort_by(|a, b| (a.depth, &a.location).cmp(&(b.depth, &b.location)));
    out
}

/// The shared resolution + reification pipeline.
///
/// `update` names packages whose lockfile entries are discarded before
/// seeding, forcing re-resolution to the newest satisfying versions;
/// `Some(&[])` discards every entry (full update), `None` honors the
/// lockfile as-is.
async fn run_pipeline<S: PackumentSource + TarballSource>(
    config: &Config,
    fetcher: &S,
    loaded: Option<LoadedLockfile>,
    update: Option<&[String]>,
    extra_edges: &[(String, String)],
    progress: ProgressFn<'_>,
) -> Result<InstallOutcome, PmError> {
    let root_manifest = manifest::read_manifest(&config.cwd)?;
    let mut tree = Tree::new_root(config.cwd.clone(), root_manifest);

    let mut virtual_lock = loaded.as_ref().map(|l| l.lockfile.clone());
    if let Some(lockfile) = virtual_lock.as_mut() {
        if let Some(names) = update {
            prune_lock(lockfile, names);
        }
        lock::seed_virtual(&mut tree, lockfile);
    }
    for (name, spec) in extra_edges {
        let root = tree.root();
        tree.add_edge(root, name, spec, save_kind_edge(config.save_kind));
    }

    build_ideal_tree(&mut tree, fetcher).await?;
    let ideal = lock::from_tree(&tree);
    let package_count = ideal.packages.len().saturating_sub(1);

    let lockfile_path = write_project_lockfile(config, &ideal, loaded.as_ref())?;

    // Short-circuit when the hidden lockfile proves the tree current.
    if let Some(hidden) = lock::load_hidden(&config.cwd) {
        if hidden.content_hash() == ideal.content_hash()
            && lock::verify(&config.cwd, &ideal).is_empty()
        {
            debug!("node_modules already matches the ideal tree");
            return Ok(InstallOutcome {
                report: ReifyReport::default(),
                lockfile_path,
                package_count,
                up_to_date: true,
            });
        }
    }

    let actual_state = actual::load_actual(&config.cwd);
    let report = reify(
        &config.cwd,
        &ideal,
        &actual_state,
        fetcher,
        fetcher,
        config.tarball_concurrency,
        progress,
    )
    .await?;
    lock::write_hidden(&config.cwd, &ideal)?;

    info!(
        added = report.added,
        updated = report.updated,
        removed = report.removed,
        "install complete"
    );
    Ok(InstallOutcome {
        report,
        lockfile_path,
        package_count,
        up_to_date: false,
    })
}

/// Discard lockfile entries so the builder re-resolves them.
fn prune_lock(lockfile: &mut Lockfile, names: &[String]) {
    if names.is_empty() {
        lockfile.packages.retain(|loc, _| loc.is_empty());
        return;
    }
    lockfile.packages.retain(|location, _| {
        let Some((_, folder)) = lock::split_location(location) else {
            return true;
        };
        !names.contains(&folder)
    });
}

/// Persist the project lockfile, preserving the detected format.
fn write_project_lockfile(
    config: &Config,
    ideal: &Lockfile,
    loaded: Option<&LoadedLockfile>,
) -> Result<PathBuf, PmError> {
    let (path, content) = match loaded {
        Some(LoadedLockfile {
            format: LockFormat::Yarn,
            path,
            ..
        }) => {
            // Reparse for checksum carry-over; the file was readable
            // moments ago.
            let original = std::fs::read_to_string(path)
                .ok()
                .and_then(|c| lock::yarn::parse(&c).ok());
            (path.clone(), lock::yarn::serialize(ideal, original.as_ref()))
        }
        Some(loaded) => {
            let content = match loaded.schema_version {
                1 => lock::npm::serialize_v1(ideal),
                2 => lock::npm::serialize_v2(ideal),
                _ => lock::npm::serialize_v3(ideal),
            };
            (loaded.path.clone(), content)
        }
        None => {
            let content = match config.lockfile_version {
                LockfileVersion::V1 => lock::npm::serialize_v1(ideal),
                LockfileVersion::V2 => lock::npm::serialize_v2(ideal),
                LockfileVersion::V3 => lock::npm::serialize_v3(ideal),
            };
            (
                config.cwd.join(LockFormat::PackageLock.filename()),
                content,
            )
        }
    };

    bramble_util::fs::atomic_write(&path, content.as_bytes())
        .map_err(|e| PmError::fs(format!("Failed to write {}: {e}", path.display())))?;
    Ok(path)
}

/// Kind of dependency edge a save-kind records.
#[must_use]
pub fn save_kind_edge(kind: SaveKind) -> EdgeKind {
    match kind {
        SaveKind::Prod => EdgeKind::Prod,
        SaveKind::Dev => EdgeKind::Dev,
        SaveKind::Optional => EdgeKind::Optional,
        SaveKind::Peer => EdgeKind::Peer,
    }
}

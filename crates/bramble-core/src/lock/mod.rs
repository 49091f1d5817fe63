//! Lockfile model.
//!
//! Three historical npm schemas (v1 nested, v2 hybrid, v3 flat) plus the
//! yarn-berry SYML format normalize into one canonical representation:
//! the v3 shape, `packages` keyed by location with the root at `""`.
//! Serialization back out is faithful per format.

pub mod npm;
pub mod yarn;

use crate::error::PmError;
use crate::manifest::Manifest;
use crate::tree::{NodeId, Tree};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Hidden canonical lockfile kept inside `node_modules`.
pub const HIDDEN_LOCKFILE: &str = ".package-lock.json";

/// Canonical lockfile version.
pub const CANONICAL_VERSION: u32 = 3;

/// On-disk lockfile flavors, in detection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFormat {
    NpmShrinkwrap,
    PackageLock,
    Yarn,
}

impl LockFormat {
    /// The filename this format lives under.
    #[must_use]
    pub fn filename(self) -> &'static str {
        match self {
            Self::NpmShrinkwrap => "npm-shrinkwrap.json",
            Self::PackageLock => "package-lock.json",
            Self::Yarn => "yarn.lock",
        }
    }
}

/// One locked package.
///
/// Field order is the canonical v3 key order; empty/false/absent fields
/// are pruned on serialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockEntry {
    /// Real registry name, present only when it differs from the folder
    /// name (aliases) or on the root entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub dev: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub peer: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies_meta: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub engines: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding: Option<Value>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !b
}

/// The canonical lockfile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lockfile {
    /// Root package name.
    pub name: String,
    /// Root package version.
    pub version: Option<String>,
    /// Location → entry; the empty string is the root, every other key
    /// is a slash-separated path starting with `node_modules/`.
    pub packages: BTreeMap<String, LockEntry>,
}

impl Lockfile {
    /// Create an empty lockfile with a root entry.
    #[must_use]
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        let name = name.into();
        let mut packages = BTreeMap::new();
        packages.insert(
            String::new(),
            LockEntry {
                name: Some(name.clone()),
                version: version.clone(),
                ..Default::default()
            },
        );
        Self {
            name,
            version,
            packages,
        }
    }

    /// The root entry.
    #[must_use]
    pub fn root_entry(&self) -> Option<&LockEntry> {
        self.packages.get("")
    }

    /// Serialize to the canonical v3 string.
    #[must_use]
    pub fn to_v3_string(&self) -> String {
        npm::serialize_v3(self)
    }

    /// Content hash for up-to-date checks.
    #[must_use]
    pub fn content_hash(&self) -> String {
        bramble_util::hash::blake3_bytes(self.to_v3_string().as_bytes())
    }
}

/// A lockfile loaded from disk, remembering where it came from so a
/// write can preserve the detected format.
#[derive(Debug, Clone)]
pub struct LoadedLockfile {
    pub lockfile: Lockfile,
    pub format: LockFormat,
    /// Schema version for npm formats; 0 for yarn.
    pub schema_version: u32,
    pub path: PathBuf,
}

/// Find the highest-priority lockfile present in `dir`.
#[must_use]
pub fn detect(dir: &Path) -> Option<(LockFormat, PathBuf)> {
    for format in [
        LockFormat::NpmShrinkwrap,
        LockFormat::PackageLock,
        LockFormat::Yarn,
    ] {
        let path = dir.join(format.filename());
        if path.is_file() {
            return Some((format, path));
        }
    }
    None
}

/// Load and normalize the project lockfile, if any.
///
/// # Errors
/// `LOCKFILE_ERROR` when the file exists but cannot be parsed; the
/// operation must abort before any disk mutation.
pub fn load(dir: &Path) -> Result<Option<LoadedLockfile>, PmError> {
    let Some((format, path)) = detect(dir) else {
        return Ok(None);
    };
    let content = std::fs::read_to_string(&path)
        .map_err(|e| PmError::lockfile(format!("Failed to read {}: {e}", path.display())))?;

    let (lockfile, schema_version) = match format {
        LockFormat::Yarn => (yarn::parse(&content)?.to_canonical(), 0),
        LockFormat::NpmShrinkwrap | LockFormat::PackageLock => {
            let value: Value = serde_json::from_str(&content).map_err(|e| {
                PmError::lockfile(format!("Invalid JSON in {}: {e}", path.display()))
            })?;
            let version = npm::detect_version(&value);
            (npm::parse(&value)?, version)
        }
    };

    Ok(Some(LoadedLockfile {
        lockfile,
        format,
        schema_version,
        path,
    }))
}

/// Load the hidden canonical lockfile under `node_modules`, if present
/// and parseable.
#[must_use]
pub fn load_hidden(dir: &Path) -> Option<Lockfile> {
    let path = dir.join("node_modules").join(HIDDEN_LOCKFILE);
    let content = std::fs::read_to_string(path).ok()?;
    let value: Value = serde_json::from_str(&content).ok()?;
    npm::parse(&value).ok()
}

/// Write the hidden canonical lockfile.
///
/// # Errors
/// Returns `FS_ERROR` when the write fails.
pub fn write_hidden(dir: &Path, lockfile: &Lockfile) -> Result<(), PmError> {
    let node_modules = dir.join("node_modules");
    std::fs::create_dir_all(&node_modules)
        .map_err(|e| PmError::fs(format!("Failed to create node_modules: {e}")))?;
    let path = node_modules.join(HIDDEN_LOCKFILE);
    bramble_util::fs::atomic_write(&path, lockfile.to_v3_string().as_bytes())
        .map_err(|e| PmError::fs(format!("Failed to write {}: {e}", path.display())))
}

/// Capture the ideal tree as a canonical lockfile.
#[must_use]
pub fn from_tree(tree: &Tree) -> Lockfile {
    let root = tree.root();
    let root_node = tree.node(root);
    let manifest = &root_node.manifest;

    let mut lockfile = Lockfile::new(
        root_node.name.clone(),
        (!root_node.version.is_empty()).then(|| root_node.version.clone()),
    );
    {
        let root_entry = lockfile.packages.get_mut("").expect("root entry");
        root_entry.dependencies = manifest.dependencies.clone();
        root_entry.dev_dependencies = manifest.dev_dependencies.clone();
        root_entry.optional_dependencies = manifest.optional_dependencies.clone();
        root_entry.peer_dependencies = manifest.peer_dependencies.clone();
    }

    for (location, id) in tree.inventory().iter() {
        if location.is_empty() {
            continue;
        }
        lockfile
            .packages
            .insert(location.to_string(), entry_from_node(tree, id));
    }
    lockfile
}

fn entry_from_node(tree: &Tree, id: NodeId) -> LockEntry {
    let node = tree.node(id);
    let manifest = &node.manifest;
    LockEntry {
        name: node.registry_name.clone(),
        version: Some(node.version.clone()),
        resolved: node.resolved.clone(),
        integrity: node.integrity.clone(),
        dev: node.flags.dev,
        optional: node.flags.optional,
        peer: node.flags.peer,
        dependencies: manifest.dependencies.clone(),
        dev_dependencies: BTreeMap::new(),
        optional_dependencies: manifest.optional_dependencies.clone(),
        peer_dependencies: manifest.peer_dependencies.clone(),
        peer_dependencies_meta: manifest
            .peer_dependencies_meta
            .iter()
            .filter(|(_, meta)| meta.optional)
            .map(|(k, _)| (k.clone(), serde_json::json!({ "optional": true })))
            .collect(),
        engines: manifest.engines.clone(),
        bin: manifest
            .bin
            .as_ref()
            .map(|b| serde_json::to_value(b).expect("bin serializes")),
        license: None,
        funding: None,
    }
}

/// Split a location into its parent location and final package name.
///
/// `node_modules/@scope/a/node_modules/b` → (`node_modules/@scope/a`,
/// `b`); a top-level location has the root (empty) parent.
#[must_use]
pub fn split_location(location: &str) -> Option<(String, String)> {
    if location.is_empty() {
        return None;
    }
    match location.rfind("/node_modules/") {
        Some(pos) => Some((
            location[..pos].to_string(),
            location[pos + "/node_modules/".len()..].to_string(),
        )),
        None => location
            .strip_prefix("node_modules/")
            .map(|name| (String::new(), name.to_string())),
    }
}

/// Seed a virtual tree from a lockfile: every entry becomes a node at
/// its recorded location, with edges rebuilt from the recorded dep maps.
///
/// Entries whose location does not parse (foreign or corrupt) are
/// skipped; the builder treats the resulting gaps as problem edges.
pub fn seed_virtual(tree: &mut Tree, lockfile: &Lockfile) {
    for (location, entry) in &lockfile.packages {
        if location.is_empty() {
            continue;
        }
        let Some((parent_location, folder_name)) = split_location(location) else {
            continue;
        };
        let Some(parent) = tree.inventory().get_by_location(&parent_location) else {
            continue;
        };
        if tree.node(parent).children.contains_key(&folder_name) {
            continue;
        }

        let manifest = Manifest {
            name: Some(
                entry
                    .name
                    .clone()
                    .unwrap_or_else(|| folder_name.clone()),
            ),
            version: entry.version.clone(),
            dependencies: entry.dependencies.clone(),
            optional_dependencies: entry.optional_dependencies.clone(),
            peer_dependencies: entry.peer_dependencies.clone(),
            peer_dependencies_meta: entry
                .peer_dependencies_meta
                .iter()
                .filter_map(|(k, v)| {
                    serde_json::from_value(v.clone()).ok().map(|m| (k.clone(), m))
                })
                .collect(),
            bin: entry
                .bin
                .as_ref()
                .and_then(|b| serde_json::from_value(b.clone()).ok()),
            engines: entry.engines.clone(),
            ..Default::default()
        };

        let node = tree.new_node(
            folder_name.clone(),
            entry.version.clone().unwrap_or_default(),
            manifest,
        );
        {
            let data = tree.node_mut(node);
            data.registry_name = entry
                .name
                .clone()
                .filter(|n| *n != folder_name);
            data.resolved = entry.resolved.clone();
            data.integrity = entry.integrity.clone();
            data.flags.dev = entry.dev;
            data.flags.optional = entry.optional;
            data.flags.peer = entry.peer;
        }
        tree.set_parent(node, parent);
    }

    // Resolution state settles only once the whole shape exists.
    for id in tree.subtree(tree.root()) {
        tree.reload_all_edges(id);
    }
}

/// Kinds of disagreement between disk state and a lockfile entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyIssueKind {
    /// The directory is absent.
    Missing,
    /// The directory exists but has no package.json.
    MissingManifest,
    /// The installed version differs from the locked one.
    VersionMismatch { expected: String, actual: String },
    /// The installed package.json does not parse.
    InvalidManifest,
}

/// One verification finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyIssue {
    pub location: String,
    pub kind: VerifyIssueKind,
}

/// Compare the on-disk `node_modules` state against a lockfile.
#[must_use]
pub fn verify(dir: &Path, lockfile: &Lockfile) -> Vec<VerifyIssue> {
    let mut issues = Vec::new();
    for (location, entry) in &lockfile.packages {
        if location.is_empty() {
            continue;
        }
        let pkg_dir = dir.join(location);
        if !pkg_dir.is_dir() {
            issues.push(VerifyIssue {
                location: location.clone(),
                kind: VerifyIssueKind::Missing,
            });
            continue;
        }
        let manifest_path = pkg_dir.join("package.json");
        if !manifest_path.is_file() {
            issues.push(VerifyIssue {
                location: location.clone(),
                kind: VerifyIssueKind::MissingManifest,
            });
            continue;
        }
        let parsed: Option<Value> = std::fs::read_to_string(&manifest_path)
            .ok()
            .and_then(|c| serde_json::from_str(&c).ok());
        let Some(parsed) = parsed else {
            issues.push(VerifyIssue {
                location: location.clone(),
                kind: VerifyIssueKind::InvalidManifest,
            });
            continue;
        };
        let actual = parsed.get("version").and_then(Value::as_str).unwrap_or("");
        if let Some(expected) = &entry.version {
            if actual != expected {
                issues.push(VerifyIssue {
                    location: location.clone(),
                    kind: VerifyIssueKind::VersionMismatch {
                        expected: expected.clone(),
                        actual: actual.to_string(),
                    },
                });
            }
        }
    }
    issues
}

/// Difference between two lockfiles, by location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockDiff {
    /// Locations present only in the new lockfile.
    pub add: Vec<String>,
    /// Locations present only in the old lockfile.
    pub remove: Vec<String>,
    /// Locations present in both with differing versions
    /// (location, old version, new version).
    pub update: Vec<(String, String, String)>,
}

impl LockDiff {
    /// Whether the two sides agree completely.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty() && self.update.is_empty()
    }
}

/// Set-difference over location keys; version mismatches go to `update`.
#[must_use]
pub fn diff(old: &Lockfile, new: &Lockfile) -> LockDiff {
    let mut result = LockDiff::default();

    for (location, new_entry) in &new.packages {
        if location.is_empty() {
            continue;
        }
        match old.packages.get(location) {
            None => result.add.push(location.clone()),
            Some(old_entry) if old_entry.version != new_entry.version => {
                result.update.push((
                    location.clone(),
                    old_entry.version.clone().unwrap_or_default(),
                    new_entry.version.clone().unwrap_or_default(),
                ));
            }
            Some(_) => {}
        }
    }
    for location in old.packages.keys() {
        if !location.is_empty() && !new.packages.contains_key(location) {
            result.remove.push(location.clone());
        }
    }
    result
}

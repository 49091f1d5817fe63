//! package.json reading, dependency extraction, and save-back.

use crate::config::SaveKind;
use crate::error::PmError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Distribution metadata for a published version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dist {
    /// Tarball URL.
    #[serde(default)]
    pub tarball: Option<String>,
    /// SRI integrity string.
    #[serde(default)]
    pub integrity: Option<String>,
}

/// `peerDependenciesMeta` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMeta {
    #[serde(default)]
    pub optional: bool,
}

/// The `bin` field: a bare path (binary named after the package) or a
/// name → path map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BinField {
    Path(String),
    Map(BTreeMap<String, String>),
}

/// Per-version package metadata.
///
/// Parsed from a packument's `versions` entry, a lockfile entry, or an
/// installed `package.json`. Unknown fields are ignored on read; the
/// root manifest is saved back through [`add_dependency`] /
/// [`remove_dependency`], which edit the raw JSON to preserve them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub peer_dependencies_meta: BTreeMap<String, PeerMeta>,
    #[serde(default)]
    pub bin: Option<BinField>,
    #[serde(default)]
    pub engines: BTreeMap<String, String>,
    #[serde(default)]
    pub dist: Option<Dist>,
}

impl Manifest {
    /// Parse from a JSON value.
    ///
    /// # Errors
    /// Returns `MANIFEST_ERROR` if the value does not deserialize.
    pub fn from_value(value: &Value) -> Result<Self, PmError> {
        serde_json::from_value(value.clone())
            .map_err(|e| PmError::manifest(format!("Invalid manifest: {e}")))
    }

    /// Binary name → relative path pairs for this package.
    ///
    /// The string form uses the unscoped package name as the binary name.
    #[must_use]
    pub fn bin_entries(&self, pkg_name: &str) -> Vec<(String, String)> {
        match &self.bin {
            None => Vec::new(),
            Some(BinField::Path(path)) => {
                let bin_name = pkg_name.rsplit('/').next().unwrap_or(pkg_name);
                vec![(bin_name.to_string(), path.clone())]
            }
            Some(BinField::Map(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Whether a peer dependency is marked optional in
    /// `peerDependenciesMeta`.
    #[must_use]
    pub fn peer_is_optional(&self, name: &str) -> bool {
        self.peer_dependencies_meta
            .get(name)
            .is_some_and(|m| m.optional)
    }
}

/// Read and parse `<dir>/package.json`.
///
/// # Errors
/// Returns `MANIFEST_ERROR` if the file is missing, unreadable, or not a
/// JSON object.
pub fn read_manifest(dir: &Path) -> Result<Manifest, PmError> {
    let value = read_manifest_value(dir)?;
    Manifest::from_value(&value)
}

/// Read `<dir>/package.json` as a raw JSON value.
///
/// # Errors
/// Returns `MANIFEST_ERROR` on read/parse failure.
pub fn read_manifest_value(dir: &Path) -> Result<Value, PmError> {
    let path = dir.join("package.json");
    let content = std::fs::read_to_string(&path).map_err(|e| {
        PmError::manifest(format!("Failed to read {}: {e}", path.display()))
    })?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| PmError::manifest(format!("Invalid JSON in {}: {e}", path.display())))?;
    if !value.is_object() {
        return Err(PmError::manifest("package.json must be a JSON object"));
    }
    Ok(value)
}

fn save_map_key(kind: SaveKind) -> &'static str {
    match kind {
        SaveKind::Prod => "dependencies",
        SaveKind::Dev => "devDependencies",
        SaveKind::Optional => "optionalDependencies",
        SaveKind::Peer => "peerDependencies",
    }
}

/// Record `name: spec` in the chosen dep-map of the root manifest,
/// removing it from the other maps, and write the file back atomically.
///
/// # Errors
/// Returns `MANIFEST_ERROR` on read/parse failure, `FS_ERROR` on write
/// failure.
pub fn add_dependency(
    dir: &Path,
    name: &str,
    spec: &str,
    kind: SaveKind,
) -> Result<(), PmError> {
    let mut value = read_manifest_value(dir)?;
    let obj = value.as_object_mut().expect("checked object on read");

    for key in [
        "dependencies",
        "devDependencies",
        "optionalDependencies",
        "peerDependencies",
    ] {
        if key == save_map_key(kind) {
            continue;
        }
        if let Some(map) = obj.get_mut(key).and_then(Value::as_object_mut) {
            map.remove(name);
        }
    }

    let target = obj
        .entry(save_map_key(kind).to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    let target = target
        .as_object_mut()
        .ok_or_else(|| PmError::manifest(format!("'{}' is not an object", save_map_key(kind))))?;
    target.insert(name.to_string(), Value::String(spec.to_string()));

    write_manifest_value(dir, &value)
}

/// Remove `name` from every dep-map of the root manifest and write it
/// back atomically.
///
/// # Errors
/// Returns `MANIFEST_ERROR`/`FS_ERROR` as [`add_dependency`] does.
pub fn remove_dependency(dir: &Path, name: &str) -> Result<bool, PmError> {
    let mut value = read_manifest_value(dir)?;
    let obj = value.as_object_mut().expect("checked object on read");

    let mut removed = false;
    for key in [
        "dependencies",
        "devDependencies",
        "optionalDependencies",
        "peerDependencies",
    ] {
        if let Some(map) = obj.get_mut(key).and_then(Value::as_object_mut) {
            removed |= map.remove(name).is_some();
        }
    }

    if removed {
        write_manifest_value(dir, &value)?;
    }
    Ok(removed)
}

fn write_manifest_value(dir: &Path, value: &Value) -> Result<(), PmError> {
    let path = dir.join("package.json");
    let mut content = serde_json::to_string_pretty(value)
        .map_err(|e| PmError::manifest(format!("Failed to serialize package.json: {e}")))?;
    content.push('\n');
    bramble_util::fs::atomic_write(&path, content.as_bytes())
        .map_err(|e| PmError::fs(format!("Failed to write {}: {e}", path.display())))
}

/// A package spec given on the command line.
///
/// Grammar: `name` | `name@range` | `@scope/name@range` |
/// `alias@npm:name@range` | `alias@npm:@scope/name@range`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageArg {
    /// Folder name the package installs under (the alias, if aliased).
    pub name: String,
    /// The spec recorded in the manifest (`^1.2.3`, `npm:real@^1`, ...).
    /// `None` means no range was given (install latest).
    pub spec: Option<String>,
}

impl PackageArg {
    /// Parse a command-line package spec.
    ///
    /// # Errors
    /// Returns `SPEC_INVALID` when the input cannot be split into a name
    /// and optional spec.
    pub fn parse(input: &str) -> Result<Self, PmError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PmError::spec_invalid("Empty package spec"));
        }

        // The name ends at the first '@' past position zero; a leading
        // '@' belongs to the scope.
        let search_from = usize::from(input.starts_with('@'));
        let at = input[search_from..].find('@').map(|i| i + search_from);

        let (name, spec) = match at {
            Some(pos) => {
                let spec = &input[pos + 1..];
                if spec.is_empty() {
                    return Err(PmError::spec_invalid(format!(
                        "Empty version range in '{input}'"
                    )));
                }
                (&input[..pos], Some(spec.to_string()))
            }
            None => (input, None),
        };

        if name.is_empty() || name == "@" {
            return Err(PmError::spec_invalid(format!(
                "Missing package name in '{input}'"
            )));
        }
        if name.starts_with('@') && !name.contains('/') {
            return Err(PmError::spec_invalid(format!(
                "Scoped package missing '/': '{input}'"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            spec,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_package_json(dir: &Path, content: &str) {
        fs::write(dir.join("package.json"), content).unwrap();
    }

    #[test]
    fn test_read_manifest_maps() {
        let dir = tempdir().unwrap();
        write_package_json(
            dir.path(),
            r#"{
                "name": "app",
                "version": "1.0.0",
                "dependencies": { "a": "^1.0.0" },
                "devDependencies": { "b": "^2.0.0" },
                "optionalDependencies": { "c": "^3.0.0" },
                "peerDependencies": { "d": "^4.0.0" },
                "peerDependenciesMeta": { "d": { "optional": true } }
            }"#,
        );

        let m = read_manifest(dir.path()).unwrap();
        assert_eq!(m.name.as_deref(), Some("app"));
        assert_eq!(m.dependencies.get("a").unwrap(), "^1.0.0");
        assert_eq!(m.dev_dependencies.get("b").unwrap(), "^2.0.0");
        assert_eq!(m.optional_dependencies.get("c").unwrap(), "^3.0.0");
        assert_eq!(m.peer_dependencies.get("d").unwrap(), "^4.0.0");
        assert!(m.peer_is_optional("d"));
        assert!(!m.peer_is_optional("a"));
    }

    #[test]
    fn test_read_manifest_missing() {
        let dir = tempdir().unwrap();
        let err = read_manifest(dir.path()).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::MANIFEST_ERROR);
    }

    #[test]
    fn test_read_manifest_non_object() {
        let dir = tempdir().unwrap();
        write_package_json(dir.path(), "[1, 2]");
        assert!(read_manifest(dir.path()).is_err());
    }

    #[test]
    fn test_bin_entries_string_form() {
        let m = Manifest {
            bin: Some(BinField::Path("cli.js".to_string())),
            ..Default::default()
        };
        assert_eq!(
            m.bin_entries("@scope/tool"),
            vec![("tool".to_string(), "cli.js".to_string())]
        );
        assert_eq!(
            m.bin_entries("tool"),
            vec![("tool".to_string(), "cli.js".to_string())]
        );
    }

    #[test]
    fn test_bin_entries_map_form() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), "bin/a.js".to_string());
        map.insert("b".to_string(), "bin/b.js".to_string());
        let m = Manifest {
            bin: Some(BinField::Map(map)),
            ..Default::default()
        };
        assert_eq!(m.bin_entries("pkg").len(), 2);
    }

    #[test]
    fn test_add_dependency_moves_between_maps() {
        let dir = tempdir().unwrap();
        write_package_json(
            dir.path(),
            r#"{"name":"app","devDependencies":{"a":"^1.0.0"},"license":"MIT"}"#,
        );

        add_dependency(dir.path(), "a", "^2.0.0", SaveKind::Prod).unwrap();

        let m = read_manifest(dir.path()).unwrap();
        assert_eq!(m.dependencies.get("a").unwrap(), "^2.0.0");
        assert!(m.dev_dependencies.is_empty());

        // Unknown fields survive the rewrite.
        let raw = read_manifest_value(dir.path()).unwrap();
        assert_eq!(raw.get("license").unwrap(), "MIT");
    }

    #[test]
    fn test_remove_dependency() {
        let dir = tempdir().unwrap();
        write_package_json(
            dir.path(),
            r#"{"dependencies":{"a":"^1.0.0"},"devDependencies":{"a":"^1.0.0","b":"*"}}"#,
        );

        assert!(remove_dependency(dir.path(), "a").unwrap());
        assert!(!remove_dependency(dir.path(), "missing").unwrap());

        let m = read_manifest(dir.path()).unwrap();
        assert!(m.dependencies.is_empty());
        assert_eq!(m.dev_dependencies.len(), 1);
    }

    #[test]
    fn test_package_arg_plain() {
        let arg = PackageArg::parse("react").unwrap();
        assert_eq!(arg.name, "react");
        assert_eq!(arg.spec, None);
    }

    #[test]
    fn test_package_arg_with_range() {
        let arg = PackageArg::parse("react@^18.0.0").unwrap();
        assert_eq!(arg.name, "react");
        assert_eq!(arg.spec.as_deref(), Some("^18.0.0"));
    }

    #[test]
    fn test_package_arg_scoped() {
        let arg = PackageArg::parse("@types/node@^20").unwrap();
        assert_eq!(arg.name, "@types/node");
        assert_eq!(arg.spec.as_deref(), Some("^20"));

        let arg = PackageArg::parse("@types/node").unwrap();
        assert_eq!(arg.name, "@types/node");
        assert_eq!(arg.spec, None);
    }

    #[test]
    fn test_package_arg_alias() {
        let arg = PackageArg::parse("foo@npm:bar@^1").unwrap();
        assert_eq!(arg.name, "foo");
        assert_eq!(arg.spec.as_deref(), Some("npm:bar@^1"));

        let arg = PackageArg::parse("foo@npm:@scope/bar@^1").unwrap();
        assert_eq!(arg.name, "foo");
        assert_eq!(arg.spec.as_deref(), Some("npm:@scope/bar@^1"));
    }

    #[test]
    fn test_package_arg_invalid() {
        assert!(PackageArg::parse("").is_err());
        assert!(PackageArg::parse("@").is_err());
        assert!(PackageArg::parse("@scope").is_err());
        assert!(PackageArg::parse("react@").is_err());
    }
}

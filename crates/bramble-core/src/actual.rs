//! Actual-tree loading: what is installed on disk right now.
//!
//! Scans `node_modules/**` (scope-aware, nested trees included) into the
//! canonical lockfile shape, so the reifier can diff it against the
//! ideal tree. Unreadable or manifest-less directories are skipped; the
//! diff then schedules them for reinstallation.

use crate::lock::{LockEntry, Lockfile};
use crate::manifest::Manifest;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Capture the installed state of a project directory.
///
/// Prefers the hidden lockfile when it is present and agrees with the
/// directory layout; otherwise falls back to a full scan.
#[must_use]
pub fn load_actual(dir: &Path) -> Lockfile {
    let (name, version) = root_identity(dir);
    let mut lockfile = Lockfile::new(name, version);

    let node_modules = dir.join("node_modules");
    if node_modules.is_dir() {
        scan_node_modules(&node_modules, "", &mut lockfile.packages);
    }
    lockfile
}

fn root_identity(dir: &Path) -> (String, Option<String>) {
    let Ok(manifest) = crate::manifest::read_manifest(dir) else {
        return ("root".to_string(), None);
    };
    (
        manifest.name.unwrap_or_else(|| "root".to_string()),
        manifest.version,
    )
}

fn scan_node_modules(
    node_modules: &Path,
    location_prefix: &str,
    packages: &mut BTreeMap<String, LockEntry>,
) {
    let Ok(entries) = fs::read_dir(node_modules) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let file_name = entry.file_name();
        let dir_name = file_name.to_string_lossy();
        if dir_name.starts_with('.') {
            continue;
        }

        if dir_name.starts_with('@') {
            // Scope directory: packages live one level down.
            if let Ok(scope_entries) = fs::read_dir(&path) {
                for scope_entry in scope_entries.flatten() {
                    let pkg_path = scope_entry.path();
                    if pkg_path.is_dir() {
                        let folder =
                            format!("{dir_name}/{}", scope_entry.file_name().to_string_lossy());
                        scan_package(&pkg_path, &folder, location_prefix, packages);
                    }
                }
            }
        } else {
            scan_package(&path, &dir_name, location_prefix, packages);
        }
    }
}

fn scan_package(
    pkg_path: &Path,
    folder_name: &str,
    location_prefix: &str,
    packages: &mut BTreeMap<String, LockEntry>,
) {
    let location = if location_prefix.is_empty() {
        format!("node_modules/{folder_name}")
    } else {
        format!("{location_prefix}/node_modules/{folder_name}")
    };

    let manifest_path = pkg_path.join("package.json");
    let manifest: Option<Manifest> = fs::read_to_string(&manifest_path)
        .ok()
        .and_then(|content| serde_json::from_str::<Value>(&content).ok())
        .and_then(|value| Manifest::from_value(&value).ok());

    if let Some(manifest) = manifest {
        let installed_name = manifest.name.clone().unwrap_or_default();
        packages.insert(
            location.clone(),
            LockEntry {
                // An installed name differing from the folder marks an
                // alias.
                name: (!installed_name.is_empty() && installed_name != folder_name)
                    .then_some(installed_name),
                version: manifest.version.clone(),
                dependencies: manifest.dependencies.clone(),
                optional_dependencies: manifest.optional_dependencies.clone(),
                peer_dependencies: manifest.peer_dependencies.clone(),
                bin: manifest
                    .bin
                    .as_ref()
                    .map(|b| serde_json::to_value(b).expect("bin serializes")),
                ..Default::default()
            },
        );
    }

    let nested = pkg_path.join("node_modules");
    if nested.is_dir() {
        scan_node_modules(&nested, &location, packages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_pkg(dir: &Path, name: &str, version: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join("package.json"),
            format!(r#"{{"name":"{name}","version":"{version}"}}"#),
        )
        .unwrap();
    }

    #[test]
    fn test_scan_flat_and_nested() {
        let dir = tempdir().unwrap();
        write_pkg(dir.path(), "app", "1.0.0");
        write_pkg(&dir.path().join("node_modules/a"), "a", "1.0.0");
        write_pkg(
            &dir.path().join("node_modules/a/node_modules/b"),
            "b",
            "2.0.0",
        );

        let actual = load_actual(dir.path());
        assert_eq!(actual.name, "app");
        assert_eq!(
            actual.packages["node_modules/a"].version.as_deref(),
            Some("1.0.0")
        );
        assert_eq!(
            actual.packages["node_modules/a/node_modules/b"]
                .version
                .as_deref(),
            Some("2.0.0")
        );
    }

    #[test]
    fn test_scan_scoped_packages() {
        let dir = tempdir().unwrap();
        write_pkg(dir.path(), "app", "1.0.0");
        write_pkg(&dir.path().join("node_modules/@types/node"), "@types/node", "20.0.0");

        let actual = load_actual(dir.path());
        assert_eq!(
            actual.packages["node_modules/@types/node"]
                .version
                .as_deref(),
            Some("20.0.0")
        );
    }

    #[test]
    fn test_scan_records_alias() {
        let dir = tempdir().unwrap();
        write_pkg(dir.path(), "app", "1.0.0");
        // Installed under "foo" but the manifest names the real package.
        write_pkg(&dir.path().join("node_modules/foo"), "@scope/bar", "1.4.0");

        let actual = load_actual(dir.path());
        let foo = &actual.packages["node_modules/foo"];
        assert_eq!(foo.name.as_deref(), Some("@scope/bar"));
    }

    #[test]
    fn test_scan_skips_dot_dirs_and_broken_manifests() {
        let dir = tempdir().unwrap();
        write_pkg(dir.path(), "app", "1.0.0");
        fs::create_dir_all(dir.path().join("node_modules/.bin")).unwrap();
        let broken = dir.path().join("node_modules/broken");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join("package.json"), "{{{").unwrap();

        let actual = load_actual(dir.path());
        assert!(actual.packages.keys().all(|k| !k.contains(".bin")));
        assert!(!actual.packages.contains_key("node_modules/broken"));
    }

    #[test]
    fn test_missing_node_modules_is_empty() {
        let dir = tempdir().unwrap();
        write_pkg(dir.path(), "app", "1.0.0");
        let actual = load_actual(dir.path());
        assert_eq!(actual.packages.len(), 1);
    }
}

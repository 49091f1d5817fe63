//! Filesystem writer: materialize tree nodes under `node_modules` and
//! maintain the shared `.bin` shim directory.

use crate::error::PmError;
use crate::manifest::Manifest;
use crate::tarball::extract_tarball;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// The on-disk directory for a location under the project root.
#[must_use]
pub fn node_path(root: &Path, location: &str) -> PathBuf {
    root.join(location)
}

/// Extract `tarball_bytes` into a node's directory, replacing any
/// existing content.
///
/// # Errors
/// Returns `FS_ERROR` on extraction or I/O failure.
pub fn write_node(root: &Path, location: &str, tarball_bytes: &[u8]) -> Result<(), PmError> {
    let dest = node_path(root, location);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PmError::fs(format!("Failed to create {}: {e}", parent.display())))?;
    }
    extract_tarball(tarball_bytes, &dest)
}

/// Recursively delete a node's directory.
///
/// Symlinks are unlinked, never followed into.
///
/// # Errors
/// Returns `FS_ERROR` on I/O failure other than the path being absent.
pub fn remove_node(root: &Path, location: &str) -> Result<(), PmError> {
    let dest = node_path(root, location);
    match dest.symlink_metadata() {
        Err(_) => Ok(()),
        Ok(meta) if meta.file_type().is_symlink() || meta.is_file() => fs::remove_file(&dest)
            .map_err(|e| PmError::fs(format!("Failed to remove {}: {e}", dest.display()))),
        Ok(_) => bramble_util::fs::remove_dir_all_if_exists(&dest)
            .map_err(|e| PmError::fs(format!("Failed to remove {}: {e}", dest.display()))),
    }
}

/// Whether a node is materialized: the directory exists and contains a
/// manifest file.
#[must_use]
pub fn node_exists(root: &Path, location: &str) -> bool {
    node_path(root, location).join("package.json").is_file()
}

/// Read the installed version of a node, if any.
#[must_use]
pub fn installed_version(root: &Path, location: &str) -> Option<String> {
    let content = fs::read_to_string(node_path(root, location).join("package.json")).ok()?;
    let value: Value = serde_json::from_str(&content).ok()?;
    value
        .get("version")
        .and_then(Value::as_str)
        .map(String::from)
}

/// Create executable shims under `<root>/node_modules/.bin` for every
/// `bin` entry of the package at `location`, replacing pre-existing
/// entries of the same name. Returns the created shim paths.
///
/// # Errors
/// Returns `FS_ERROR` when a link cannot be created.
pub fn create_bin_links(
    root: &Path,
    location: &str,
    pkg_name: &str,
    manifest: &Manifest,
) -> Result<Vec<PathBuf>, PmError> {
    let entries = manifest.bin_entries(pkg_name);
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    let bin_dir = root.join("node_modules").join(".bin");
    fs::create_dir_all(&bin_dir)
        .map_err(|e| PmError::fs(format!("Failed to create .bin directory: {e}")))?;

    let mut created = Vec::with_capacity(entries.len());
    for (bin_name, bin_path) in entries {
        // Shims never escape the bin directory.
        if bin_name.contains('/') || bin_name.contains('\\') {
            continue;
        }
        let link = bin_dir.join(&bin_name);
        let target = node_path(root, location).join(&bin_path);
        let relative = relative_bin_target(location, &bin_path);

        remove_existing(&link)?;
        make_link(&link, &target, &relative)?;
        created.push(link);
    }
    Ok(created)
}

/// Remove stale shims by name (for packages leaving the tree).
///
/// # Errors
/// Returns `FS_ERROR` when a shim cannot be removed.
pub fn remove_bin_links(root: &Path, names: &[String]) -> Result<(), PmError> {
    let bin_dir = root.join("node_modules").join(".bin");
    for name in names {
        remove_existing(&bin_dir.join(name))?;
        #[cfg(windows)]
        remove_existing(&bin_dir.join(format!("{name}.cmd")))?;
    }
    Ok(())
}

/// Binary names a lockfile `bin` value declares for a package.
#[must_use]
pub fn bin_names(pkg_name: &str, bin: &Value) -> Vec<String> {
    match bin {
        Value::String(_) => {
            let name = pkg_name.rsplit('/').next().unwrap_or(pkg_name);
            vec![name.to_string()]
        }
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Relative symlink target from `node_modules/.bin` into the package.
fn relative_bin_target(location: &str, bin_path: &str) -> PathBuf {
    // `location` always starts with `node_modules/`; the shim directory
    // lives directly inside it.
    let inside = location.strip_prefix("node_modules/").unwrap_or(location);
    PathBuf::from("..").join(inside).join(bin_path)
}

fn remove_existing(link: &Path) -> Result<(), PmError> {
    if link.symlink_metadata().is_ok() {
        let result = if link.is_dir() && !link.symlink_metadata().unwrap().file_type().is_symlink()
        {
            fs::remove_dir_all(link)
        } else {
            fs::remove_file(link)
        };
        result.map_err(|e| PmError::fs(format!("Failed to replace {}: {e}", link.display())))?;
    }
    Ok(())
}

#[cfg(unix)]
fn make_link(link: &Path, target: &Path, relative: &Path) -> Result<(), PmError> {
    std::os::unix::fs::symlink(relative, link).map_err(|e| {
        PmError::fs(format!(
            "Failed to link {} -> {}: {e}",
            link.display(),
            relative.display()
        ))
    })?;

    // The linked script must be executable.
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(target) {
        let mut perms = meta.permissions();
        perms.set_mode(perms.mode() | 0o111);
        let _ = fs::set_permissions(target, perms);
    }
    Ok(())
}

#[cfg(windows)]
fn make_link(link: &Path, target: &Path, _relative: &Path) -> Result<(), PmError> {
    // Windows gets a cmd shim instead of a symlink.
    let cmd_path = link.with_extension("cmd");
    let shim = format!("@ECHO off\r\nnode \"{}\" %*\r\n", target.display());
    fs::write(&cmd_path, shim)
        .map_err(|e| PmError::fs(format!("Failed to create shim {}: {e}", cmd_path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::BinField;
    use crate::tarball::make_tarball;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_exists_and_version() {
        let dir = tempdir().unwrap();
        let tgz = make_tarball("package", &[("package.json", r#"{"name":"a","version":"1.2.3"}"#)]);

        write_node(dir.path(), "node_modules/a", &tgz).unwrap();
        assert!(node_exists(dir.path(), "node_modules/a"));
        assert_eq!(
            installed_version(dir.path(), "node_modules/a").as_deref(),
            Some("1.2.3")
        );
        assert!(!node_exists(dir.path(), "node_modules/missing"));
        assert_eq!(installed_version(dir.path(), "node_modules/missing"), None);
    }

    #[test]
    fn test_remove_node_idempotent() {
        let dir = tempdir().unwrap();
        let tgz = make_tarball("package", &[("package.json", "{}")]);
        write_node(dir.path(), "node_modules/a", &tgz).unwrap();

        remove_node(dir.path(), "node_modules/a").unwrap();
        assert!(!node_exists(dir.path(), "node_modules/a"));
        remove_node(dir.path(), "node_modules/a").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_node_unlinks_symlink_without_following() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir_all(&real).unwrap();
        fs::write(real.join("keep.txt"), "data").unwrap();

        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        std::os::unix::fs::symlink(&real, dir.path().join("node_modules/linked")).unwrap();

        remove_node(dir.path(), "node_modules/linked").unwrap();
        assert!(real.join("keep.txt").is_file(), "symlink target untouched");
        assert!(!dir.path().join("node_modules/linked").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_bin_links_created_and_replaced() {
        let dir = tempdir().unwrap();
        let tgz = make_tarball(
            "package",
            &[
                ("package.json", r#"{"name":"tool","version":"1.0.0","bin":"cli.js"}"#),
                ("cli.js", "#!/usr/bin/env node\n"),
            ],
        );
        write_node(dir.path(), "node_modules/tool", &tgz).unwrap();

        let manifest = Manifest {
            bin: Some(BinField::Path("cli.js".to_string())),
            ..Default::default()
        };

        // Pre-existing entry under the same name gets replaced.
        let bin_dir = dir.path().join("node_modules/.bin");
        fs::create_dir_all(&bin_dir).unwrap();
        fs::write(bin_dir.join("tool"), "stale").unwrap();

        let created = create_bin_links(dir.path(), "node_modules/tool", "tool", &manifest).unwrap();
        assert_eq!(created.len(), 1);

        let link = bin_dir.join("tool");
        let target = fs::read_link(&link).unwrap();
        assert_eq!(target, PathBuf::from("../tool/cli.js"));

        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(dir.path().join("node_modules/tool/cli.js"))
            .unwrap()
            .permissions()
            .mode();
        assert_ne!(mode & 0o111, 0, "target must be executable");
    }

    #[cfg(unix)]
    #[test]
    fn test_bin_links_map_form_scoped() {
        let dir = tempdir().unwrap();
        let tgz = make_tarball(
            "package",
            &[
                ("package.json", "{}"),
                ("bin/a.js", ""),
                ("bin/b.js", ""),
            ],
        );
        write_node(dir.path(), "node_modules/@scope/multi", &tgz).unwrap();

        let manifest = Manifest {
            bin: Some(BinField::Map(BTreeMap::from([
                ("alpha".to_string(), "bin/a.js".to_string()),
                ("beta".to_string(), "bin/b.js".to_string()),
            ]))),
            ..Default::default()
        };

        let created =
            create_bin_links(dir.path(), "node_modules/@scope/multi", "@scope/multi", &manifest)
                .unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(
            fs::read_link(dir.path().join("node_modules/.bin/alpha")).unwrap(),
            PathBuf::from("../@scope/multi/bin/a.js")
        );
    }

    #[test]
    fn test_remove_bin_links() {
        let dir = tempdir().unwrap();
        let bin_dir = dir.path().join("node_modules/.bin");
        fs::create_dir_all(&bin_dir).unwrap();
        fs::write(bin_dir.join("gone"), "").unwrap();

        remove_bin_links(dir.path(), &["gone".to_string(), "never-there".to_string()]).unwrap();
        assert!(!bin_dir.join("gone").exists());
    }

    #[test]
    fn test_bin_names_from_lock_value() {
        assert_eq!(
            bin_names("@scope/tool", &serde_json::json!("cli.js")),
            vec!["tool".to_string()]
        );
        assert_eq!(
            bin_names("pkg", &serde_json::json!({"a": "a.js", "b": "b.js"})),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(bin_names("pkg", &serde_json::json!(42)).is_empty());
    }
}

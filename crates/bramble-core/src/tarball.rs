//! Tarball extraction.
//!
//! npm tarballs carry a single top-level directory (conventionally
//! `package/`, but some publishers use the bare package name) which is
//! stripped on extraction. Entries are sanitized against absolute paths
//! and traversal.

use crate::error::PmError;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tar::Archive;

/// Extract a gzipped tarball under `dest`, stripping the single
/// top-level directory. Extraction goes through a temp directory next to
/// the destination, then renames into place.
///
/// # Errors
/// Returns `FS_ERROR` on malformed archives, unsafe entry paths, or I/O
/// failure.
pub fn extract_tarball(bytes: &[u8], dest: &Path) -> Result<(), PmError> {
    let parent = dest
        .parent()
        .ok_or_else(|| PmError::fs("Extraction destination has no parent"))?;
    fs::create_dir_all(parent)
        .map_err(|e| PmError::fs(format!("Failed to create {}: {e}", parent.display())))?;

    let temp_dir = parent.join(format!(
        ".extract-{}-{}",
        std::process::id(),
        temp_nonce()
    ));
    if temp_dir.exists() {
        let _ = fs::remove_dir_all(&temp_dir);
    }
    fs::create_dir_all(&temp_dir)
        .map_err(|e| PmError::fs(format!("Failed to create temp dir: {e}")))?;

    let result = unpack_to(bytes, &temp_dir).and_then(|()| {
        let top = find_top_level(&temp_dir)?;
        if dest.exists() {
            fs::remove_dir_all(dest)
                .map_err(|e| PmError::fs(format!("Failed to clear {}: {e}", dest.display())))?;
        }
        fs::rename(&top, dest)
            .map_err(|e| PmError::fs(format!("Failed to move package into place: {e}")))
    });

    let _ = fs::remove_dir_all(&temp_dir);
    result
}

fn unpack_to(bytes: &[u8], dest: &Path) -> Result<(), PmError> {
    let gz = GzDecoder::new(bytes);
    let mut archive = Archive::new(gz);

    for entry in archive
        .entries()
        .map_err(|e| PmError::fs(format!("Failed to read tarball entries: {e}")))?
    {
        let mut entry =
            entry.map_err(|e| PmError::fs(format!("Failed to read tarball entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| PmError::fs(format!("Failed to read entry path: {e}")))?
            .into_owned();

        if path.is_absolute() {
            return Err(PmError::fs(format!(
                "Tarball contains absolute path: {}",
                path.display()
            )));
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(PmError::fs(format!(
                "Tarball contains path traversal: {}",
                path.display()
            )));
        }

        let dest_path = dest.join(&path);
        if !dest_path.starts_with(dest) {
            return Err(PmError::fs(format!(
                "Tarball entry escapes destination: {}",
                path.display()
            )));
        }
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            fs::create_dir_all(&dest_path)?;
        } else if entry_type.is_file() {
            let mut file = File::create(&dest_path)?;
            io::copy(&mut entry, &mut file)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(mode) = entry.header().mode() {
                    let _ = fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode));
                }
            }
        }
        // Symlinks and special entries are skipped.
    }
    Ok(())
}

/// Find the single top-level directory of an unpacked tarball.
fn find_top_level(dir: &Path) -> Result<PathBuf, PmError> {
    let package = dir.join("package");
    if package.is_dir() {
        return Ok(package);
    }

    let dirs: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| PmError::fs(format!("Failed to read extracted dir: {e}")))?
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path())
        .collect();

    match dirs.as_slice() {
        [single] => Ok(single.clone()),
        [] => Err(PmError::fs("Tarball has no top-level directory")),
        many => Err(PmError::fs(format!(
            "Tarball has {} top-level directories, expected 1",
            many.len()
        ))),
    }
}

fn temp_nonce() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos().into())
            .unwrap_or(0),
    );
    hasher.finish() as u32
}

#[cfg(test)]
pub(crate) fn make_tarball(prefix: &str, files: &[(&str, &str)]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_path(format!("{prefix}/{path}")).unwrap();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, content.as_bytes()).unwrap();
        }
        builder.finish().unwrap();
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_extract_package_prefix() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("node_modules/a");

        let tgz = make_tarball(
            "package",
            &[("package.json", r#"{"name":"a","version":"1.0.0"}"#), ("index.js", "ok")],
        );
        extract_tarball(&tgz, &dest).unwrap();

        assert!(dest.join("package.json").is_file());
        assert!(dest.join("index.js").is_file());
    }

    #[test]
    fn test_extract_bare_name_prefix() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("node_modules/node");

        let tgz = make_tarball("node", &[("index.d.ts", "declare const x: number;")]);
        extract_tarball(&tgz, &dest).unwrap();
        assert!(dest.join("index.d.ts").is_file());
    }

    #[test]
    fn test_extract_replaces_existing() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("node_modules/a");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale.js"), "old").unwrap();

        let tgz = make_tarball("package", &[("fresh.js", "new")]);
        extract_tarball(&tgz, &dest).unwrap();

        assert!(dest.join("fresh.js").is_file());
        assert!(!dest.join("stale.js").exists());
    }

    #[test]
    fn test_extract_rejects_empty() {
        let dir = tempdir().unwrap();
        // A tarball with zero entries has no top-level directory.
        let tgz = make_tarball("package", &[]);
        let result = extract_tarball(&tgz, &dir.path().join("dest"));
        assert!(result.is_err());
    }
}

//! npm lockfile schemas: v1 (nested), v2 (hybrid), v3 (flat).

use super::{LockEntry, Lockfile};
use crate::error::PmError;
use serde_json::{json, Map, Value};

/// Determine the schema version of an npm-style lockfile value.
///
/// An explicit `lockfileVersion` wins; otherwise the presence of the
/// `packages` and `dependencies` blocks decides.
#[must_use]
pub fn detect_version(value: &Value) -> u32 {
    if let Some(v) = value.get("lockfileVersion").and_then(Value::as_u64) {
        return u32::try_from(v).unwrap_or(3);
    }
    let has_packages = value.get("packages").is_some();
    let has_dependencies = value.get("dependencies").is_some();
    match (has_packages, has_dependencies) {
        (true, false) => 3,
        (true, true) => 2,
        (false, true) => 1,
        (false, false) => 3,
    }
}

/// Normalize an npm-style lockfile value to canonical form.
///
/// # Errors
/// `LOCKFILE_ERROR` when an entry does not deserialize.
pub fn parse(value: &Value) -> Result<Lockfile, PmError> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("root")
        .to_string();
    let version = value
        .get("version")
        .and_then(Value::as_str)
        .map(String::from);

    match detect_version(value) {
        1 => parse_v1(value, name, version),
        _ => parse_packages(value, name, version),
    }
}

/// v2/v3: take `packages` verbatim, ensuring a root entry exists.
fn parse_packages(value: &Value, name: String, version: Option<String>) -> Result<Lockfile, PmError> {
    let mut lockfile = Lockfile::new(name, version);

    let Some(packages) = value.get("packages").and_then(Value::as_object) else {
        return Ok(lockfile);
    };
    for (location, entry_value) in packages {
        let entry: LockEntry = serde_json::from_value(entry_value.clone()).map_err(|e| {
            PmError::lockfile(format!("Invalid lockfile entry at '{location}': {e}"))
        })?;
        lockfile.packages.insert(location.clone(), entry);
    }
    // The verbatim copy may carry its own root entry; keep it, but make
    // sure one exists.
    if !lockfile.packages.contains_key("") {
        lockfile.packages.insert(
            String::new(),
            LockEntry {
                name: Some(lockfile.name.clone()),
                version: lockfile.version.clone(),
                ..Default::default()
            },
        );
    }
    Ok(lockfile)
}

/// v1: walk the nested `dependencies` tree, emitting flat entries.
/// The v1 `requires` map becomes canonical `dependencies`.
fn parse_v1(value: &Value, name: String, version: Option<String>) -> Result<Lockfile, PmError> {
    let mut lockfile = Lockfile::new(name, version);
    if let Some(deps) = value.get("dependencies").and_then(Value::as_object) {
        walk_v1(deps, "", &mut lockfile)?;
    }
    Ok(lockfile)
}

fn walk_v1(
    deps: &Map<String, Value>,
    parent_location: &str,
    lockfile: &mut Lockfile,
) -> Result<(), PmError> {
    for (dep_name, dep_value) in deps {
        let location = if parent_location.is_empty() {
            format!("node_modules/{dep_name}")
        } else {
            format!("{parent_location}/node_modules/{dep_name}")
        };

        let entry = LockEntry {
            version: dep_value
                .get("version")
                .and_then(Value::as_str)
                .map(String::from),
            resolved: dep_value
                .get("resolved")
                .and_then(Value::as_str)
                .map(String::from),
            integrity: dep_value
                .get("integrity")
                .and_then(Value::as_str)
                .map(String::from),
            dev: dep_value.get("dev").and_then(Value::as_bool).unwrap_or(false),
            optional: dep_value
                .get("optional")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            dependencies: dep_value
                .get("requires")
                .and_then(Value::as_object)
                .map(|reqs| {
                    reqs.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default(),
            ..Default::default()
        };
        lockfile.packages.insert(location.clone(), entry);

        if let Some(nested) = dep_value.get("dependencies").and_then(Value::as_object) {
            walk_v1(nested, &location, lockfile)?;
        }
    }
    Ok(())
}

fn header(lockfile: &Lockfile, schema_version: u32) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("name".to_string(), json!(lockfile.name));
    if let Some(version) = &lockfile.version {
        map.insert("version".to_string(), json!(version));
    }
    map.insert("lockfileVersion".to_string(), json!(schema_version));
    map
}

fn finish(map: Map<String, Value>) -> String {
    let mut out = serde_json::to_string_pretty(&Value::Object(map))
        .expect("lockfile serialization should not fail");
    out.push('\n');
    out
}

/// Canonical → v3: `packages` only, pruned fields, trailing newline.
#[must_use]
pub fn serialize_v3(lockfile: &Lockfile) -> String {
    let mut map = header(lockfile, 3);
    map.insert(
        "packages".to_string(),
        serde_json::to_value(&lockfile.packages).expect("entries serialize"),
    );
    finish(map)
}

/// Canonical → v2: union of the v3 `packages` block and the v1
/// `dependencies` block, `requires: true`.
#[must_use]
pub fn serialize_v2(lockfile: &Lockfile) -> String {
    let mut map = header(lockfile, 2);
    map.insert("requires".to_string(), json!(true));
    map.insert(
        "packages".to_string(),
        serde_json::to_value(&lockfile.packages).expect("entries serialize"),
    );
    map.insert("dependencies".to_string(), v1_dependencies(lockfile));
    finish(map)
}

/// Canonical → v1: nested structure rebuilt by splitting locations on
/// `/node_modules/`; canonical `dependencies` re-emitted as `requires`.
#[must_use]
pub fn serialize_v1(lockfile: &Lockfile) -> String {
    let mut map = header(lockfile, 1);
    map.insert("requires".to_string(), json!(true));
    let deps = v1_dependencies(lockfile);
    if deps.as_object().is_some_and(|o| !o.is_empty()) {
        map.insert("dependencies".to_string(), deps);
    }
    finish(map)
}

fn v1_dependencies(lockfile: &Lockfile) -> Value {
    Value::Object(v1_children(lockfile, ""))
}

/// The direct children of a location, rendered as v1 entries.
fn v1_children(lockfile: &Lockfile, parent_location: &str) -> Map<String, Value> {
    let mut out = Map::new();
    for (location, entry) in &lockfile.packages {
        if location.is_empty() {
            continue;
        }
        let Some((parent, name)) = super::split_location(location) else {
            continue;
        };
        if parent != parent_location {
            continue;
        }

        let mut v1_entry = Map::new();
        if let Some(version) = &entry.version {
            v1_entry.insert("version".to_string(), json!(version));
        }
        if let Some(resolved) = &entry.resolved {
            v1_entry.insert("resolved".to_string(), json!(resolved));
        }
        if let Some(integrity) = &entry.integrity {
            v1_entry.insert("integrity".to_string(), json!(integrity));
        }
        if entry.dev {
            v1_entry.insert("dev".to_string(), json!(true));
        }
        if entry.optional {
            v1_entry.insert("optional".to_string(), json!(true));
        }
        if !entry.dependencies.is_empty() {
            v1_entry.insert(
                "requires".to_string(),
                serde_json::to_value(&entry.dependencies).expect("map serializes"),
            );
        }
        let nested = v1_children(lockfile, location);
        if !nested.is_empty() {
            v1_entry.insert("dependencies".to_string(), Value::Object(nested));
        }
        out.insert(name, Value::Object(v1_entry));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entry(version: &str) -> LockEntry {
        LockEntry {
            version: Some(version.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_detect_version_rules() {
        assert_eq!(detect_version(&json!({ "lockfileVersion": 1 })), 1);
        assert_eq!(detect_version(&json!({ "lockfileVersion": 2 })), 2);
        assert_eq!(
            detect_version(&json!({ "packages": {}, "lockfileVersion": 3 })),
            3
        );
        assert_eq!(detect_version(&json!({ "packages": {} })), 3);
        assert_eq!(detect_version(&json!({ "packages": {}, "dependencies": {} })), 2);
        assert_eq!(detect_version(&json!({ "dependencies": {} })), 1);
        assert_eq!(detect_version(&json!({})), 3);
    }

    #[test]
    fn test_v1_normalizes_to_flat_packages() {
        let v1 = json!({
            "name": "app",
            "version": "1.0.0",
            "lockfileVersion": 1,
            "dependencies": {
                "lodash": {
                    "version": "4.17.21",
                    "resolved": "https://registry.npmjs.org/lodash/-/lodash-4.17.21.tgz",
                    "integrity": "sha512-abc"
                }
            }
        });

        let lockfile = parse(&v1).unwrap();
        let lodash = &lockfile.packages["node_modules/lodash"];
        assert_eq!(lodash.version.as_deref(), Some("4.17.21"));
        assert_eq!(
            lodash.resolved.as_deref(),
            Some("https://registry.npmjs.org/lodash/-/lodash-4.17.21.tgz")
        );
        assert_eq!(lodash.integrity.as_deref(), Some("sha512-abc"));
        assert!(lodash.dependencies.is_empty());
    }

    #[test]
    fn test_v1_nested_and_requires() {
        let v1 = json!({
            "name": "app",
            "lockfileVersion": 1,
            "dependencies": {
                "a": {
                    "version": "1.0.0",
                    "requires": { "b": "^2.0.0" },
                    "dependencies": {
                        "b": { "version": "2.5.0", "dev": true }
                    }
                }
            }
        });

        let lockfile = parse(&v1).unwrap();
        let a = &lockfile.packages["node_modules/a"];
        assert_eq!(a.dependencies.get("b").unwrap(), "^2.0.0");
        let b = &lockfile.packages["node_modules/a/node_modules/b"];
        assert_eq!(b.version.as_deref(), Some("2.5.0"));
        assert!(b.dev);
    }

    #[test]
    fn test_v1_round_trip_reproduces_subtree() {
        let v1 = json!({
            "name": "app",
            "version": "1.0.0",
            "lockfileVersion": 1,
            "requires": true,
            "dependencies": {
                "lodash": {
                    "version": "4.17.21",
                    "resolved": "https://registry.npmjs.org/lodash/-/lodash-4.17.21.tgz",
                    "integrity": "sha512-abc"
                }
            }
        });

        let lockfile = parse(&v1).unwrap();
        let serialized = serialize_v1(&lockfile);
        let reparsed: Value = serde_json::from_str(&serialized).unwrap();
        assert_eq!(reparsed["dependencies"], v1["dependencies"]);
        assert!(serialized.ends_with('\n'));
    }

    #[test]
    fn test_v3_round_trip_is_lossless() {
        let mut lockfile = Lockfile::new("app", Some("1.0.0".to_string()));
        lockfile.packages.get_mut("").unwrap().dependencies =
            BTreeMap::from([("a".to_string(), "^1.0.0".to_string())]);
        lockfile.packages.insert(
            "node_modules/a".to_string(),
            LockEntry {
                version: Some("1.2.3".to_string()),
                resolved: Some("https://registry.npmjs.org/a/-/a-1.2.3.tgz".to_string()),
                integrity: Some("sha512-xyz".to_string()),
                dev: true,
                dependencies: BTreeMap::from([("b".to_string(), "*".to_string())]),
                ..Default::default()
            },
        );
        lockfile
            .packages
            .insert("node_modules/b".to_string(), entry("3.0.0"));

        let serialized = serialize_v3(&lockfile);
        let reparsed = parse(&serde_json::from_str(&serialized).unwrap()).unwrap();
        assert_eq!(reparsed, lockfile);
    }

    #[test]
    fn test_v2_carries_both_blocks() {
        let mut lockfile = Lockfile::new("app", Some("1.0.0".to_string()));
        lockfile
            .packages
            .insert("node_modules/a".to_string(), entry("1.0.0"));

        let serialized = serialize_v2(&lockfile);
        let value: Value = serde_json::from_str(&serialized).unwrap();
        assert_eq!(value["lockfileVersion"], 2);
        assert_eq!(value["requires"], true);
        assert!(value["packages"]["node_modules/a"].is_object());
        assert!(value["dependencies"]["a"].is_object());

        // Parsing a v2 file prefers the packages block.
        let reparsed = parse(&value).unwrap();
        assert_eq!(reparsed, lockfile);
    }

    #[test]
    fn test_v3_output_is_stable_and_unescaped() {
        let mut lockfile = Lockfile::new("app", None);
        lockfile.packages.insert(
            "node_modules/a".to_string(),
            LockEntry {
                version: Some("1.0.0".to_string()),
                resolved: Some("https://registry.npmjs.org/a/-/a-1.0.0.tgz".to_string()),
                ..Default::default()
            },
        );

        let first = serialize_v3(&lockfile);
        let second = serialize_v3(&lockfile);
        assert_eq!(first, second);
        // Slashes stay unescaped.
        assert!(first.contains("https://registry.npmjs.org/a/-/a-1.0.0.tgz"));
        assert!(!first.contains("\\/"));
    }

    #[test]
    fn test_v3_prunes_empty_fields() {
        let mut lockfile = Lockfile::new("app", None);
        lockfile
            .packages
            .insert("node_modules/a".to_string(), entry("1.0.0"));

        let serialized = serialize_v3(&lockfile);
        let value: Value = serde_json::from_str(&serialized).unwrap();
        let a = &value["packages"]["node_modules/a"];
        assert_eq!(a["version"], "1.0.0");
        assert!(a.get("dev").is_none());
        assert!(a.get("dependencies").is_none());
        assert!(a.get("integrity").is_none());
    }

    #[test]
    fn test_missing_root_entry_synthesized() {
        let value = json!({
            "name": "app",
            "lockfileVersion": 3,
            "packages": {
                "node_modules/a": { "version": "1.0.0" }
            }
        });
        let lockfile = parse(&value).unwrap();
        assert!(lockfile.packages.contains_key(""));
        assert_eq!(
            lockfile.root_entry().unwrap().name.as_deref(),
            Some("app")
        );
    }
}

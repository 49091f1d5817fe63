//! yarn-berry lockfile support (the SYML format).
//!
//! Keys are comma-separated descriptors `<name>@<protocol>:<range>`; the
//! `resolution` field names the definitive `name@npm:version`. Entries
//! with non-`npm` protocols (`workspace:`, `patch:`, `portal:`) are
//! preserved opaquely and excluded from placement.

use super::{LockEntry, Lockfile};
use crate::error::PmError;
use crate::version;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write as _;

/// `__metadata` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YarnMetadata {
    pub version: u64,
    pub cache_key: String,
}

impl Default for YarnMetadata {
    fn default() -> Self {
        Self {
            version: 8,
            cache_key: "10c0".to_string(),
        }
    }
}

/// A descriptor: `name@protocol:range`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YarnDescriptor {
    pub name: String,
    pub protocol: String,
    pub range: String,
}

impl YarnDescriptor {
    /// Parse a descriptor, keeping the leading `@` of scoped names.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let search_from = usize::from(input.starts_with('@'));
        let at = input[search_from..].find('@').map(|i| i + search_from)?;
        let name = input[..at].to_string();
        let rest = &input[at + 1..];
        if name.is_empty() {
            return None;
        }
        let (protocol, range) = match rest.split_once(':') {
            Some((p, r)) => (p.to_string(), r.to_string()),
            None => ("npm".to_string(), rest.to_string()),
        };
        Some(Self {
            name,
            protocol,
            range,
        })
    }
}

/// One lockfile entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct YarnEntry {
    pub descriptors: Vec<YarnDescriptor>,
    pub version: Option<String>,
    pub resolution: Option<String>,
    pub dependencies: BTreeMap<String, String>,
    pub dev_dependencies: BTreeMap<String, String>,
    pub optional_dependencies: BTreeMap<String, String>,
    pub peer_dependencies: BTreeMap<String, String>,
    pub checksum: Option<String>,
    pub language_name: Option<String>,
    pub link_type: Option<String>,
}

impl YarnEntry {
    /// The parsed resolution descriptor, when present.
    #[must_use]
    pub fn resolution_descriptor(&self) -> Option<YarnDescriptor> {
        self.resolution.as_deref().and_then(YarnDescriptor::parse)
    }

    /// Whether this entry resolves through the npm registry.
    #[must_use]
    pub fn is_npm(&self) -> bool {
        self.resolution_descriptor()
            .is_some_and(|d| d.protocol == "npm")
    }

    /// Whether this is the project workspace entry.
    #[must_use]
    pub fn is_workspace(&self) -> bool {
        self.resolution_descriptor()
            .is_some_and(|d| d.protocol == "workspace")
    }
}

/// A parsed yarn lockfile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct YarnLock {
    pub metadata: YarnMetadata,
    pub entries: Vec<YarnEntry>,
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].replace("\\\"", "\"")
    } else {
        s.to_string()
    }
}

/// Parse yarn-berry lockfile content.
///
/// # Errors
/// `LOCKFILE_ERROR` on structurally broken input (bad indentation, a
/// field outside any entry).
pub fn parse(content: &str) -> Result<YarnLock, PmError> {
    let mut lock = YarnLock::default();
    let mut current: Option<YarnEntry> = None;
    let mut current_is_metadata = false;
    let mut submap: Option<String> = None;

    for (line_no, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim_end();
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let indent = indent_of(line);

        match indent {
            0 => {
                let Some(key) = line.strip_suffix(':') else {
                    return Err(PmError::lockfile(format!(
                        "yarn.lock line {}: expected 'key:'",
                        line_no + 1
                    )));
                };
                if let Some(entry) = current.take() {
                    if !current_is_metadata {
                        lock.entries.push(entry);
                    }
                }
                submap = None;

                if unquote(key) == "__metadata" {
                    current_is_metadata = true;
                    current = Some(YarnEntry::default());
                } else {
                    current_is_metadata = false;
                    // Descriptors are quoted individually, so split
                    // before unquoting.
                    let descriptors = key
                        .split(", ")
                        .map(unquote)
                        .filter_map(|d| YarnDescriptor::parse(&d))
                        .collect();
                    current = Some(YarnEntry {
                        descriptors,
                        ..Default::default()
                    });
                }
            }
            2 => {
                let Some(entry) = current.as_mut() else {
                    return Err(PmError::lockfile(format!(
                        "yarn.lock line {}: field outside an entry",
                        line_no + 1
                    )));
                };
                let body = line.trim_start();
                if let Some(field) = body.strip_suffix(':') {
                    // Nested map follows at indent 4.
                    submap = Some(unquote(field));
                    continue;
                }
                submap = None;
                let Some((field, value)) = body.split_once(':') else {
                    continue;
                };
                let field = unquote(field);
                let value = unquote(value);
                if current_is_metadata {
                    match field.as_str() {
                        "version" => {
                            lock.metadata.version = value.parse().unwrap_or(8);
                        }
                        "cacheKey" => lock.metadata.cache_key = value,
                        _ => {}
                    }
                    continue;
                }
                match field.as_str() {
                    "version" => entry.version = Some(value),
                    "resolution" => entry.resolution = Some(value),
                    "checksum" => entry.checksum = Some(value),
                    "languageName" => entry.language_name = Some(value),
                    "linkType" => entry.link_type = Some(value),
                    _ => {}
                }
            }
            4 => {
                let (Some(entry), Some(map_name)) = (current.as_mut(), submap.as_deref()) else {
                    continue;
                };
                let body = line.trim_start();
                let Some((dep_name, dep_range)) = body.split_once(':') else {
                    continue;
                };
                let dep_name = unquote(dep_name);
                let dep_range = unquote(dep_range);
                let map = match map_name {
                    "dependencies" => &mut entry.dependencies,
                    "devDependencies" => &mut entry.dev_dependencies,
                    "optionalDependencies" => &mut entry.optional_dependencies,
                    "peerDependencies" => &mut entry.peer_dependencies,
                    _ => continue,
                };
                map.insert(dep_name, dep_range);
            }
            _ => {
                // peerDependenciesMeta and other deep blocks are not
                // placement-relevant; skip.
            }
        }
    }
    if let Some(entry) = current.take() {
        if !current_is_metadata {
            lock.entries.push(entry);
        }
    }
    Ok(lock)
}

fn strip_npm_protocol(range: &str) -> &str {
    range.strip_prefix("npm:").unwrap_or(range)
}

impl YarnLock {
    /// The project workspace entry.
    #[must_use]
    pub fn workspace_entry(&self) -> Option<&YarnEntry> {
        self.entries.iter().find(|e| e.is_workspace())
    }

    /// Normalize to canonical form via a deterministic hoisting pass:
    /// BFS from the workspace entry's dep maps, placing each dependency
    /// at `node_modules/<name>` when free, else nested under its
    /// dependent's location.
    #[must_use]
    pub fn to_canonical(&self) -> Lockfile {
        let (root_name, root_version, root_entry) = match self.workspace_entry() {
            Some(entry) => {
                let name = entry
                    .resolution_descriptor()
                    .map(|d| d.name)
                    .unwrap_or_else(|| "root".to_string());
                (name, entry.version.clone(), Some(entry))
            }
            None => ("root".to_string(), None, None),
        };

        let mut lockfile = Lockfile::new(root_name, root_version);

        // Descriptor index over npm entries.
        let mut by_descriptor: HashMap<(String, String), usize> = HashMap::new();
        let mut by_name: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, entry) in self.entries.iter().enumerate() {
            if !entry.is_npm() {
                continue;
            }
            for d in &entry.descriptors {
                if d.protocol == "npm" {
                    by_descriptor.insert((d.name.clone(), d.range.clone()), idx);
                }
            }
            if let Some(d) = entry.resolution_descriptor() {
                by_name.entry(d.name).or_default().push(idx);
            }
        }

        let lookup = |name: &str, range: &str| -> Option<usize> {
            let range = strip_npm_protocol(range);
            if let Some(idx) = by_descriptor.get(&(name.to_string(), range.to_string())) {
                return Some(*idx);
            }
            // Fall back to any entry of that name whose version
            // satisfies; foreign lockfiles sometimes reshape ranges.
            by_name.get(name).and_then(|candidates| {
                candidates.iter().copied().find(|idx| {
                    self.entries[*idx]
                        .resolution_descriptor()
                        .is_some_and(|d| {
                            version::satisfies(&d.range, range).unwrap_or(false)
                        })
                })
            })
        };

        // Seed from the root's dep maps.
        let mut queue: VecDeque<(String, String, String, bool, bool)> = VecDeque::new();
        if let Some(root) = root_entry {
            {
                let entry = lockfile.packages.get_mut("").expect("root entry");
                entry.dependencies = root
                    .dependencies
                    .iter()
                    .map(|(k, v)| (k.clone(), strip_npm_protocol(v).to_string()))
                    .collect();
                entry.dev_dependencies = root
                    .dev_dependencies
                    .iter()
                    .map(|(k, v)| (k.clone(), strip_npm_protocol(v).to_string()))
                    .collect();
                entry.optional_dependencies = root
                    .optional_dependencies
                    .iter()
                    .map(|(k, v)| (k.clone(), strip_npm_protocol(v).to_string()))
                    .collect();
            }
            for (name, range) in &root.dependencies {
                queue.push_back((name.clone(), range.clone(), String::new(), false, false));
            }
            for (name, range) in &root.dev_dependencies {
                queue.push_back((name.clone(), range.clone(), String::new(), true, false));
            }
            for (name, range) in &root.optional_dependencies {
                queue.push_back((name.clone(), range.clone(), String::new(), false, true));
            }
        }

        while let Some((name, range, parent_location, dev, optional)) = queue.pop_front() {
            let Some(idx) = lookup(&name, &range) else {
                continue;
            };
            let entry = &self.entries[idx];
            let Some(resolution) = entry.resolution_descriptor() else {
                continue;
            };
            let entry_version = entry
                .version
                .clone()
                .unwrap_or_else(|| resolution.range.clone());

            let top_slot = format!("node_modules/{name}");
            let nested_slot = if parent_location.is_empty() {
                top_slot.clone()
            } else {
                format!("{parent_location}/node_modules/{name}")
            };
            let location = match lockfile.packages.get(&top_slot) {
                None => top_slot,
                Some(existing) if existing.version.as_deref() == Some(&entry_version) => {
                    continue; // already hoisted
                }
                Some(_) => nested_slot,
            };
            if let Some(existing) = lockfile.packages.get(&location) {
                if existing.version.as_deref() == Some(&entry_version) {
                    continue;
                }
                // The slot is taken by an incompatible version; the
                // foreign lockfile is inconsistent. First placement wins.
                continue;
            }

            lockfile.packages.insert(
                location.clone(),
                LockEntry {
                    name: (resolution.name != name).then(|| resolution.name.clone()),
                    version: Some(entry_version),
                    dev,
                    optional,
                    dependencies: entry
                        .dependencies
                        .iter()
                        .map(|(k, v)| (k.clone(), strip_npm_protocol(v).to_string()))
                        .collect(),
                    optional_dependencies: entry
                        .optional_dependencies
                        .iter()
                        .map(|(k, v)| (k.clone(), strip_npm_protocol(v).to_string()))
                        .collect(),
                    peer_dependencies: entry.peer_dependencies.clone(),
                    ..Default::default()
                },
            );

            for (dep_name, dep_range) in &entry.dependencies {
                queue.push_back((dep_name.clone(), dep_range.clone(), location.clone(), dev, optional));
            }
            for (dep_name, dep_range) in &entry.optional_dependencies {
                queue.push_back((dep_name.clone(), dep_range.clone(), location.clone(), dev, true));
            }
        }

        lockfile
    }
}

/// SYML quoting: quote keys and string values containing structural
/// characters, a leading `-`, or anything that would parse as a number.
fn syml_string(s: &str) -> String {
    let needs_quoting = s.is_empty()
        || s.starts_with('-')
        || s.parse::<f64>().is_ok()
        || s.chars()
            .any(|c| ":@/#{}[]|>*&!%'\"".contains(c) || c == ' ');
    if needs_quoting {
        format!("\"{}\"", s.replace('"', "\\\""))
    } else {
        s.to_string()
    }
}

fn write_map(out: &mut String, name: &str, map: &BTreeMap<String, String>) {
    if map.is_empty() {
        return;
    }
    let _ = writeln!(out, "  {name}:");
    for (k, v) in map {
        let _ = writeln!(out, "    {}: {}", syml_string(k), syml_string(v));
    }
}

/// `key` arrives pre-quoted (descriptors are quoted one by one).
fn render_entry(out: &mut String, key: &str, entry: &YarnEntry) {
    let _ = writeln!(out, "{key}:");
    if let Some(version) = &entry.version {
        let _ = writeln!(out, "  version: {version}");
    }
    if let Some(resolution) = &entry.resolution {
        let _ = writeln!(out, "  resolution: {}", syml_string(resolution));
    }
    write_map(out, "dependencies", &entry.dependencies);
    write_map(out, "peerDependencies", &entry.peer_dependencies);
    if let Some(checksum) = &entry.checksum {
        let _ = writeln!(out, "  checksum: {}", syml_string(checksum));
    }
    let _ = writeln!(
        out,
        "  languageName: {}",
        entry.language_name.as_deref().unwrap_or("node")
    );
    let _ = writeln!(
        out,
        "  linkType: {}",
        entry.link_type.as_deref().unwrap_or("hard")
    );
}

/// Prefix a range with `npm:` unless it already names a protocol.
fn with_npm_protocol(range: &str) -> String {
    if range.contains(':') {
        range.to_string()
    } else {
        format!("npm:{range}")
    }
}

/// Walk up from a dependent's location looking for the tree position a
/// dependency name resolves to.
fn resolve_location(lockfile: &Lockfile, mut base: String, name: &str) -> Option<String> {
    loop {
        let candidate = if base.is_empty() {
            format!("node_modules/{name}")
        } else {
            format!("{base}/node_modules/{name}")
        };
        if lockfile.packages.contains_key(&candidate) {
            return Some(candidate);
        }
        if base.is_empty() {
            return None;
        }
        base = super::split_location(&base)
            .map(|(parent, _)| parent)
            .unwrap_or_default();
    }
}

/// Serialize canonical form as a yarn-berry lockfile.
///
/// `original` supplies `__metadata` and checksums for entries that
/// survived unchanged; checksum round-trip is best-effort.
#[must_use]
pub fn serialize(lockfile: &Lockfile, original: Option<&YarnLock>) -> String {
    let metadata = original
        .map(|o| o.metadata.clone())
        .unwrap_or_default();

    // Group canonical packages into yarn entries by real name + version;
    // hoisted duplicates collapse.
    let mut groups: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    for (location, entry) in &lockfile.packages {
        if location.is_empty() {
            continue;
        }
        let Some((_, folder)) = super::split_location(location) else {
            continue;
        };
        let real = entry.name.clone().unwrap_or(folder);
        let version = entry.version.clone().unwrap_or_default();
        groups.entry((real, version)).or_default().push(location.clone());
    }

    // Descriptors: every declared (name, range) whose resolution lands
    // on a member of the group.
    let mut descriptors: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    for (dependent_location, entry) in &lockfile.packages {
        let declared = entry
            .dependencies
            .iter()
            .chain(entry.dev_dependencies.iter())
            .chain(entry.optional_dependencies.iter());
        for (dep_name, dep_range) in declared {
            let Some(target) =
                resolve_location(lockfile, dependent_location.clone(), dep_name)
            else {
                continue;
            };
            let target_entry = &lockfile.packages[&target];
            let Some((_, folder)) = super::split_location(&target) else {
                continue;
            };
            let real = target_entry.name.clone().unwrap_or(folder);
            let version = target_entry.version.clone().unwrap_or_default();
            let descriptor = format!("{dep_name}@{}", with_npm_protocol(dep_range));
            let list = descriptors.entry((real, version)).or_default();
            if !list.contains(&descriptor) {
                list.push(descriptor);
            }
        }
    }

    let original_checksums: HashMap<String, String> = original
        .map(|o| {
            o.entries
                .iter()
                .filter_map(|e| {
                    Some((e.resolution.clone()?, e.checksum.clone()?))
                })
                .collect()
        })
        .unwrap_or_default();

    let mut rendered: BTreeMap<String, YarnEntry> = BTreeMap::new();

    // Workspace entry for the project root.
    let root_key = format!("{}@workspace:.", lockfile.name);
    let root_canonical = lockfile.root_entry();
    rendered.insert(
        syml_string(&root_key),
        YarnEntry {
            version: Some("0.0.0-use.local".to_string()),
            resolution: Some(root_key),
            dependencies: root_canonical
                .map(|e| {
                    e.dependencies
                        .iter()
                        .map(|(k, v)| (k.clone(), with_npm_protocol(v)))
                        .collect()
                })
                .unwrap_or_default(),
            peer_dependencies: BTreeMap::new(),
            language_name: Some("unknown".to_string()),
            link_type: Some("soft".to_string()),
            ..Default::default()
        },
    );

    for ((real, version), locations) in &groups {
        let entry = &lockfile.packages[&locations[0]];
        let resolution = format!("{real}@npm:{version}");
        let mut descs = descriptors
            .get(&(real.clone(), version.clone()))
            .cloned()
            .unwrap_or_default();
        if descs.is_empty() {
            descs.push(format!("{real}@npm:{version}"));
        }
        descs.sort();
        let key = descs
            .iter()
            .map(|d| syml_string(d))
            .collect::<Vec<_>>()
            .join(", ");

        rendered.insert(
            key,
            YarnEntry {
                version: Some(version.clone()),
                resolution: Some(resolution.clone()),
                dependencies: entry
                    .dependencies
                    .iter()
                    .map(|(k, v)| (k.clone(), with_npm_protocol(v)))
                    .collect(),
                peer_dependencies: entry.peer_dependencies.clone(),
                checksum: original_checksums.get(&resolution).cloned(),
                ..Default::default()
            },
        );
    }

    // Carry over non-npm entries from the original opaquely.
    if let Some(original) = original {
        for entry in &original.entries {
            if entry.is_npm() || entry.is_workspace() {
                continue;
            }
            let key: Vec<String> = entry
                .descriptors
                .iter()
                .map(|d| syml_string(&format!("{}@{}:{}", d.name, d.protocol, d.range)))
                .collect();
            rendered.insert(key.join(", "), entry.clone());
        }
    }

    let mut out = String::new();
    out.push_str("# This file is generated by running \"yarn install\" inside your project.\n");
    out.push_str("# Manual changes might be lost - proceed with caution!\n\n");
    out.push_str("__metadata:\n");
    let _ = writeln!(out, "  version: {}", metadata.version);
    let _ = writeln!(out, "  cacheKey: {}", syml_string(&metadata.cache_key));

    for (key, entry) in &rendered {
        out.push('\n');
        render_entry(&mut out, key, entry);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"# This file is generated by running "yarn install" inside your project.
# Manual changes might be lost - proceed with caution!

__metadata:
  version: 8
  cacheKey: 10c0

"app@workspace:.":
  version: 0.0.0-use.local
  resolution: "app@workspace:."
  dependencies:
    "@scope/util": "npm:^2.0.0"
    lodash: "npm:^4.17.0"
  languageName: unknown
  linkType: soft

"@scope/util@npm:^2.0.0":
  version: 2.1.0
  resolution: "@scope/util@npm:2.1.0"
  dependencies:
    lodash: "npm:^4.17.0"
  checksum: 10c0/deadbeef
  languageName: node
  linkType: hard

"lodash@npm:^4.17.0":
  version: 4.17.21
  resolution: "lodash@npm:4.17.21"
  checksum: 10c0/cafebabe
  languageName: node
  linkType: hard
"#;

    #[test]
    fn test_descriptor_parse() {
        let d = YarnDescriptor::parse("lodash@npm:^4.17.0").unwrap();
        assert_eq!(
            (d.name.as_str(), d.protocol.as_str(), d.range.as_str()),
            ("lodash", "npm", "^4.17.0")
        );

        let d = YarnDescriptor::parse("@scope/util@npm:2.1.0").unwrap();
        assert_eq!(d.name, "@scope/util");
        assert_eq!(d.range, "2.1.0");

        let d = YarnDescriptor::parse("app@workspace:.").unwrap();
        assert_eq!(d.protocol, "workspace");
        assert_eq!(d.range, ".");
    }

    #[test]
    fn test_parse_sample() {
        let lock = parse(SAMPLE).unwrap();
        assert_eq!(lock.metadata.version, 8);
        assert_eq!(lock.metadata.cache_key, "10c0");
        assert_eq!(lock.entries.len(), 3);

        let workspace = lock.workspace_entry().unwrap();
        assert_eq!(workspace.dependencies.len(), 2);

        let lodash = lock
            .entries
            .iter()
            .find(|e| e.resolution.as_deref() == Some("lodash@npm:4.17.21"))
            .unwrap();
        assert_eq!(lodash.version.as_deref(), Some("4.17.21"));
        assert_eq!(lodash.checksum.as_deref(), Some("10c0/cafebabe"));
        assert!(lodash.is_npm());
    }

    #[test]
    fn test_parse_multi_descriptor_key() {
        let content = "\"a@npm:^1.0.0\", \"a@npm:~1.2.0\":\n  version: 1.2.5\n  resolution: \"a@npm:1.2.5\"\n  languageName: node\n  linkType: hard\n";
        let lock = parse(content).unwrap();
        assert_eq!(lock.entries.len(), 1);

        let entry = &lock.entries[0];
        assert_eq!(entry.descriptors.len(), 2);
        assert_eq!(entry.descriptors[0].range, "^1.0.0");
        assert_eq!(entry.descriptors[1].range, "~1.2.0");
        assert_eq!(entry.version.as_deref(), Some("1.2.5"));
    }

    #[test]
    fn test_to_canonical_hoists_flat() {
        let lock = parse(SAMPLE).unwrap();
        let canonical = lock.to_canonical();

        assert_eq!(canonical.name, "app");
        let util = &canonical.packages["node_modules/@scope/util"];
        assert_eq!(util.version.as_deref(), Some("2.1.0"));
        assert_eq!(util.dependencies.get("lodash").unwrap(), "^4.17.0");

        let lodash = &canonical.packages["node_modules/lodash"];
        assert_eq!(lodash.version.as_deref(), Some("4.17.21"));

        // Shared dep appears once.
        assert_eq!(canonical.packages.len(), 3);
    }

    #[test]
    fn test_to_canonical_nests_on_collision() {
        let content = r#"__metadata:
  version: 8
  cacheKey: 10c0

"app@workspace:.":
  version: 0.0.0-use.local
  resolution: "app@workspace:."
  dependencies:
    a: "npm:^1.0.0"
    b: "npm:^1.0.0"
  languageName: unknown
  linkType: soft

"a@npm:^1.0.0":
  version: 1.0.0
  resolution: "a@npm:1.0.0"
  languageName: node
  linkType: hard

"b@npm:^1.0.0":
  version: 1.0.0
  resolution: "b@npm:1.0.0"
  dependencies:
    a: "npm:^2.0.0"
  languageName: node
  linkType: hard

"a@npm:^2.0.0":
  version: 2.0.0
  resolution: "a@npm:2.0.0"
  languageName: node
  linkType: hard
"#;
        let canonical = parse(content).unwrap().to_canonical();
        assert_eq!(
            canonical.packages["node_modules/a"].version.as_deref(),
            Some("1.0.0")
        );
        assert_eq!(
            canonical.packages["node_modules/b/node_modules/a"]
                .version
                .as_deref(),
            Some("2.0.0")
        );
    }

    #[test]
    fn test_non_npm_protocols_excluded_from_placement() {
        let content = r#"__metadata:
  version: 8
  cacheKey: 10c0

"app@workspace:.":
  version: 0.0.0-use.local
  resolution: "app@workspace:."
  dependencies:
    linked: "portal:../linked"
  languageName: unknown
  linkType: soft

"linked@portal:../linked::locator=app%40workspace%3A.":
  version: 0.0.0-use.local
  resolution: "linked@portal:../linked::locator=app%40workspace%3A."
  languageName: node
  linkType: soft
"#;
        let lock = parse(content).unwrap();
        let canonical = lock.to_canonical();
        // Only the root survives; the portal entry is not placed.
        assert_eq!(canonical.packages.len(), 1);

        // But serialization preserves it opaquely.
        let out = serialize(&canonical, Some(&lock));
        assert!(out.contains("portal:../linked"));
    }

    #[test]
    fn test_serialize_round_trip() {
        let lock = parse(SAMPLE).unwrap();
        let canonical = lock.to_canonical();
        let out = serialize(&canonical, Some(&lock));

        let reparsed = parse(&out).unwrap();
        let recanonical = reparsed.to_canonical();
        assert_eq!(recanonical, canonical);

        // Checksums carried best-effort for unchanged entries.
        assert!(out.contains("10c0/cafebabe"));
        // Alphabetical entry order with metadata first.
        let meta_pos = out.find("__metadata").unwrap();
        let scope_pos = out.find("\"@scope/util@npm:^2.0.0\"").unwrap();
        let lodash_pos = out.find("\"lodash@npm:^4.17.0").unwrap();
        assert!(meta_pos < scope_pos);
        assert!(scope_pos < lodash_pos);
    }

    #[test]
    fn test_syml_quoting() {
        assert_eq!(syml_string("lodash"), "lodash");
        assert_eq!(syml_string("npm:^1.0.0"), "\"npm:^1.0.0\"");
        assert_eq!(syml_string("@scope/x"), "\"@scope/x\"");
        assert_eq!(syml_string("-flag"), "\"-flag\"");
        assert_eq!(syml_string("8"), "\"8\"");
        assert_eq!(syml_string("1.2.3"), "1.2.3");
        assert_eq!(syml_string("hard"), "hard");
    }
}

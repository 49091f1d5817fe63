//! Ideal-tree construction.
//!
//! Drains problem edges from a deterministic queue, resolves each
//! against the registry, and places the resolved node as shallowly as
//! the existing constraints allow. Optionality is an explicit branch in
//! the queue-entry handler: a failed optional dependency is skipped with
//! a trace event, never unwound through errors.

use crate::config::DEFAULT_PACKUMENT_CONCURRENCY;
use crate::error::PmError;
use crate::place::{find_placement, place_dep, DepsQueue, PlaceDecision};
use crate::registry::{get_dist_tag, get_versions, version_data, PackumentSource};
use crate::tree::{NodeId, Tree};
use crate::version;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Resolve every problem edge in `tree`, mutating it into the ideal
/// tree, then recompute role flags.
///
/// The tree is expected to hold the project root (optionally pre-seeded
/// with a virtual tree loaded from a lockfile).
///
/// # Errors
/// `RESOLVE_ERROR` when a non-optional edge has no satisfying version,
/// `PLACEMENT_CONFLICT` when no tree position accepts it, plus any
/// registry failure for non-optional edges.
pub async fn build_ideal_tree<S: PackumentSource>(
    tree: &mut Tree,
    source: &S,
) -> Result<(), PmError> {
    let mut queue = DepsQueue::new();
    let mut initial_names: BTreeSet<String> = BTreeSet::new();
    for id in tree.subtree(tree.root()) {
        for edge_name in tree.problem_edges(id) {
            queue.push(tree, id, &edge_name);
            let edge = &tree.node(id).edges_out[&edge_name];
            if !version::is_foreign_spec(&edge.range) {
                initial_names.insert(edge.registry_lookup_name().to_string());
            }
        }
    }

    // Warm the packument cache for the known problem set in one bounded
    // fan-out; per-name failures resurface when the owning entry pops.
    let _: Vec<()> = stream::iter(initial_names)
        .map(|name| async move {
            if let Err(e) = source.packument(&name).await {
                debug!(name = %name, error = %e, "packument prefetch failed");
            }
        })
        .buffer_unordered(DEFAULT_PACKUMENT_CONCURRENCY)
        .collect()
        .await;

    while let Some(entry) = queue.pop() {
        if !tree.is_attached(entry.from) {
            // The from-node was displaced by a replacement; the current
            // occupant of its location owns the edge now.
            if let Some(current) = tree.inventory().get_by_location(&entry.from_location) {
                if tree.node(current).edges_out.contains_key(&entry.edge_name) {
                    queue.push(tree, current, &entry.edge_name);
                }
            }
            continue;
        }
        // A prior placement may have satisfied this edge already.
        tree.reload_edge(entry.from, &entry.edge_name);
        let Some(edge) = tree.node(entry.from).edges_out.get(&entry.edge_name) else {
            continue;
        };
        if !edge.is_problem() {
            continue;
        }

        let dep_name = edge.name.clone();
        let range = edge.range.clone();
        let spec = edge.spec.clone();
        let lookup_name = edge.registry_lookup_name().to_string();
        let registry_name = edge.registry_name.clone();
        let optional = edge.kind.is_optional();

        // Foreign specs (git/url/file) are recorded verbatim and resolved
        // through other channels; nothing to fetch here.
        if version::is_foreign_spec(&range) {
            continue;
        }

        let resolved = resolve_edge(tree, source, &lookup_name, &dep_name, &range).await;
        let node = match resolved {
            Ok(node) => node,
            Err(e) if optional && e.tolerable_for_optional() => {
                debug!(name = %dep_name, spec = %spec, error = %e, "skipping optional dependency");
                continue;
            }
            Err(e) => {
                return Err(PmError::resolve(&dep_name, &spec, e.message()));
            }
        };
        if registry_name.is_some() {
            tree.node_mut(node).registry_name = registry_name;
        }

        let version = tree.node(node).version.clone();
        let placement = find_placement(tree, entry.from, &entry.edge_name, &dep_name, &version);
        let (target, decision) = match placement {
            Ok(found) => found,
            Err(conflict) => {
                if optional {
                    debug!(name = %dep_name, spec = %spec, "skipping optional dependency on placement conflict");
                    continue;
                }
                let existing = conflict
                    .existing
                    .map(|id| {
                        let n = tree.node(id);
                        (n.name.clone(), n.version.clone())
                    })
                    .unwrap_or_else(|| {
                        let edge = &tree.node(conflict.edge_from).edges_out[&conflict.edge_name];
                        (conflict.edge_name.clone(), edge.range.clone())
                    });
                return Err(PmError::conflict(&dep_name, &spec, &existing.0, &existing.1));
            }
        };

        let placed = place_dep(tree, target, decision, node);
        if !matches!(decision, PlaceDecision::Keep(_)) {
            for edge_name in tree.problem_edges(placed) {
                queue.push(tree, placed, &edge_name);
            }
        }

        tree.reload_edge(entry.from, &entry.edge_name);
    }

    fix_flags(tree);
    prune_extraneous(tree);
    Ok(())
}

/// Detach nodes no resolved edge reaches anymore, typically lockfile
/// leftovers after a dependency was removed from the manifest.
fn prune_extraneous(tree: &mut Tree) {
    let extraneous: Vec<NodeId> = tree
        .inventory()
        .iter()
        .filter(|(_, id)| tree.node(*id).flags.extraneous)
        .map(|(_, id)| id)
        .collect();
    for id in extraneous {
        if tree.is_attached(id) {
            debug!(name = %tree.node(id).name, location = %tree.node(id).location, "pruning extraneous node");
            tree.detach(id);
        }
    }
}

/// Fetch the packument for an edge and construct a detached node for the
/// winning version.
async fn resolve_edge<S: PackumentSource>(
    tree: &mut Tree,
    source: &S,
    lookup_name: &str,
    declared_name: &str,
    range: &str,
) -> Result<NodeId, PmError> {
    let packument = source.packument(lookup_name).await?;
    let version = pick_version(&packument, range)
        .ok_or_else(|| PmError::resolve(lookup_name, range, "no satisfying version"))?;
    let data = version_data(&packument, &version)
        .ok_or_else(|| PmError::resolve(lookup_name, &version, "version missing from packument"))?;
    tree.node_from_version_data(declared_name, &version, data)
}

/// Pick the version a range resolves to within a packument.
///
/// Exact matches win outright; a bare tag consults `dist-tags`; anything
/// else takes the max-satisfying version.
#[must_use]
pub fn pick_version(packument: &Value, range: &str) -> Option<String> {
    let versions = get_versions(packument);
    let range = range.trim();

    if version::parse(range).is_ok() {
        let exact = range.trim_start_matches('=').trim_start_matches('v');
        if versions.contains(&exact) {
            return Some(exact.to_string());
        }
    }

    if range == "latest" {
        if let Some(tag) = get_dist_tag(packument, "latest") {
            if versions.contains(&tag) {
                return Some(tag.to_string());
            }
        }
        return version::max_satisfying(versions.into_iter(), "*");
    }
    if !version::is_any_range(range) && version::is_tag_name(range) {
        let tag = get_dist_tag(packument, range)?;
        return versions.contains(&tag).then(|| tag.to_string());
    }

    version::max_satisfying(versions.into_iter(), range)
}

/// Recompute role flags from scratch.
///
/// Reachability is computed in two passes (non-dev edges, then dev edges
/// from the root) and merged, so a package shared by both worlds is not
/// marked dev. Placement never updates these flags: it can change which
/// nodes are reachable from which edge type, so an incremental scheme
/// would go stale.
pub fn fix_flags(tree: &mut Tree) {
    let root = tree.root();
    let all: Vec<NodeId> = tree.inventory().iter().map(|(_, id)| id).collect();
    for id in all {
        if id != root {
            let flags = &mut tree.node_mut(id).flags;
            flags.extraneous = true;
            flags.dev = false;
            flags.optional = false;
            flags.peer = false;
        }
    }

    let mut nondev: HashMap<NodeId, bool> = HashMap::new();
    mark_reachable(tree, root, false, false, &mut nondev);

    let mut dev: HashMap<NodeId, bool> = HashMap::new();
    mark_reachable(tree, root, true, false, &mut dev);

    let ids: Vec<NodeId> = tree.inventory().iter().map(|(_, id)| id).collect();
    for id in ids {
        if id == root {
            continue;
        }
        let in_nondev = nondev.contains_key(&id);
        let in_dev = dev.contains_key(&id);
        let flags = &mut tree.node_mut(id).flags;
        if in_nondev || in_dev {
            flags.extraneous = false;
            flags.dev = in_dev && !in_nondev;
            flags.optional = *nondev.get(&id).or_else(|| dev.get(&id)).unwrap_or(&false);
        }
    }

    let ids: Vec<NodeId> = tree.inventory().iter().map(|(_, id)| id).collect();
    for id in ids {
        let peer = tree
            .node(id)
            .edges_out
            .values()
            .any(|e| e.kind.is_peer());
        tree.node_mut(id).flags.peer = peer;
    }
}

/// Walk resolved edges from `from`, recording the optional flag for each
/// visited node. `dev_pass` selects dev edges at the root; below the
/// root both passes follow non-dev edges.
fn mark_reachable(
    tree: &Tree,
    from: NodeId,
    dev_pass: bool,
    from_optional: bool,
    visited: &mut HashMap<NodeId, bool>,
) {
    let edges: Vec<(NodeId, bool, bool)> = tree
        .node(from)
        .edges_out
        .values()
        .filter_map(|e| {
            e.to.map(|to| (to, e.kind.is_dev(), e.kind.is_optional()))
        })
        .collect();

    for (to, is_dev, is_optional) in edges {
        let want_dev = dev_pass && from == tree.root();
        if is_dev != want_dev {
            continue;
        }
        let opt = from_optional || is_optional;
        match visited.get(&to) {
            // Revisit only when a non-optional path improves the flag.
            Some(existing) if !existing || opt => continue,
            _ => {}
        }
        visited.insert(to, opt);
        mark_reachable(tree, to, dev_pass, opt, visited);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use crate::registry::PackumentSource;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Fixture-backed packument source; no network.
    struct StaticSource {
        packuments: HashMap<String, Arc<Value>>,
    }

    impl StaticSource {
        fn new(entries: Vec<Value>) -> Self {
            let packuments = entries
                .into_iter()
                .map(|p| {
                    let name = p["name"].as_str().unwrap().to_string();
                    (name, Arc::new(p))
                })
                .collect();
            Self { packuments }
        }
    }

    impl PackumentSource for StaticSource {
        async fn packument(&self, name: &str) -> Result<Arc<Value>, PmError> {
            self.packuments
                .get(name)
                .cloned()
                .ok_or_else(|| PmError::not_found(name))
        }
    }

    fn packument(name: &str, versions: &[(&str, &[(&str, &str)])]) -> Value {
        let mut versions_obj = serde_json::Map::new();
        let mut latest = "0.0.0".to_string();
        for (v, deps) in versions {
            let deps_obj: serde_json::Map<String, Value> = deps
                .iter()
                .map(|(n, s)| ((*n).to_string(), json!(s)))
                .collect();
            versions_obj.insert(
                (*v).to_string(),
                json!({
                    "name": name,
                    "version": v,
                    "dependencies": deps_obj,
                    "dist": {
                        "tarball": format!("https://registry.example/{name}/-/{name}-{v}.tgz"),
                        "integrity": format!("sha512-{name}{v}")
                    }
                }),
            );
            if version::gt(v, &latest) {
                latest = (*v).to_string();
            }
        }
        json!({
            "name": name,
            "dist-tags": { "latest": latest },
            "versions": versions_obj
        })
    }

    fn root_tree(manifest: Manifest) -> Tree {
        Tree::new_root(PathBuf::from("/proj"), manifest)
    }

    fn deps(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(n, s)| ((*n).to_string(), (*s).to_string()))
            .collect()
    }

    fn location_versions(tree: &Tree) -> Vec<(String, String)> {
        tree.inventory()
            .iter()
            .filter(|(loc, _)| !loc.is_empty())
            .map(|(loc, id)| (loc.to_string(), tree.node(id).version.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_basic_install_resolves_max_satisfying() {
        let source = StaticSource::new(vec![packument(
            "a",
            &[("1.0.0", &[]), ("1.2.3", &[]), ("2.0.0", &[])],
        )]);
        let mut tree = root_tree(Manifest {
            name: Some("app".to_string()),
            dependencies: deps(&[("a", "^1.0.0")]),
            ..Default::default()
        });

        build_ideal_tree(&mut tree, &source).await.unwrap();

        assert_eq!(
            location_versions(&tree),
            vec![("node_modules/a".to_string(), "1.2.3".to_string())]
        );
        let root = tree.root();
        let edge = &tree.node(root).edges_out["a"];
        assert!(edge.valid);
    }

    #[tokio::test]
    async fn test_transitive_dep_hoists() {
        let source = StaticSource::new(vec![
            packument("b", &[("1.0.0", &[("c", "^1.0.0")])]),
            packument("c", &[("1.5.0", &[])]),
        ]);
        let mut tree = root_tree(Manifest {
            name: Some("app".to_string()),
            dependencies: deps(&[("b", "1.x")]),
            ..Default::default()
        });

        build_ideal_tree(&mut tree, &source).await.unwrap();

        let locations = location_versions(&tree);
        assert!(locations.contains(&("node_modules/b".to_string(), "1.0.0".to_string())));
        assert!(locations.contains(&("node_modules/c".to_string(), "1.5.0".to_string())));

        let b = tree.inventory().get_by_location("node_modules/b").unwrap();
        let c = tree.inventory().get_by_location("node_modules/c").unwrap();
        assert_eq!(tree.resolve(b, "c"), Some(c));
    }

    #[tokio::test]
    async fn test_conflicting_version_nests() {
        let source = StaticSource::new(vec![
            packument("a", &[("1.0.0", &[]), ("2.0.0", &[])]),
            packument("b", &[("1.0.0", &[("a", "2.x")])]),
        ]);
        let mut tree = root_tree(Manifest {
            name: Some("app".to_string()),
            dependencies: deps(&[("a", "1.x"), ("b", "1.x")]),
            ..Default::default()
        });

        build_ideal_tree(&mut tree, &source).await.unwrap();

        let locations = location_versions(&tree);
        assert!(locations.contains(&("node_modules/a".to_string(), "1.0.0".to_string())));
        assert!(locations
            .contains(&("node_modules/b/node_modules/a".to_string(), "2.0.0".to_string())));

        // Every edge in the final tree resolves to a satisfying target.
        for (_, id) in tree.inventory().iter() {
            for edge in tree.node(id).edges_out.values() {
                assert!(edge.valid, "edge {} of node {}", edge.name, tree.node(id).name);
            }
        }
    }

    #[tokio::test]
    async fn test_alias_installs_under_alias_name() {
        let source = StaticSource::new(vec![packument("@scope/bar", &[("1.4.0", &[])])]);
        let mut tree = root_tree(Manifest {
            name: Some("app".to_string()),
            dependencies: deps(&[("foo", "npm:@scope/bar@^1")]),
            ..Default::default()
        });

        build_ideal_tree(&mut tree, &source).await.unwrap();

        let foo = tree.inventory().get_by_location("node_modules/foo").unwrap();
        assert_eq!(tree.node(foo).name, "foo");
        assert_eq!(tree.node(foo).registry_name.as_deref(), Some("@scope/bar"));
        assert_eq!(tree.node(foo).version, "1.4.0");
        assert!(tree.node(tree.root()).edges_out["foo"].valid);
    }

    #[tokio::test]
    async fn test_missing_optional_dep_is_skipped() {
        let source = StaticSource::new(vec![packument("a", &[("1.0.0", &[])])]);
        let mut tree = root_tree(Manifest {
            name: Some("app".to_string()),
            dependencies: deps(&[("a", "^1.0.0")]),
            optional_dependencies: deps(&[("ghost", "^1.0.0")]),
            ..Default::default()
        });

        build_ideal_tree(&mut tree, &source).await.unwrap();

        assert_eq!(tree.inventory().len(), 2);
        let edge = &tree.node(tree.root()).edges_out["ghost"];
        assert!(edge.valid);
        assert!(edge.to.is_none());
    }

    #[tokio::test]
    async fn test_missing_required_dep_fails() {
        let source = StaticSource::new(vec![]);
        let mut tree = root_tree(Manifest {
            name: Some("app".to_string()),
            dependencies: deps(&[("ghost", "^1.0.0")]),
            ..Default::default()
        });

        let err = build_ideal_tree(&mut tree, &source).await.unwrap_err();
        assert_eq!(err.code(), crate::error::codes::RESOLVE_ERROR);
        assert!(err.message().contains("ghost"));
        assert!(err.message().contains("^1.0.0"));
    }

    #[tokio::test]
    async fn test_no_satisfying_version_fails() {
        let source = StaticSource::new(vec![packument("a", &[("1.0.0", &[])])]);
        let mut tree = root_tree(Manifest {
            name: Some("app".to_string()),
            dependencies: deps(&[("a", "^3.0.0")]),
            ..Default::default()
        });

        let err = build_ideal_tree(&mut tree, &source).await.unwrap_err();
        assert_eq!(err.code(), crate::error::codes::RESOLVE_ERROR);
    }

    #[tokio::test]
    async fn test_deterministic_tree_shape() {
        let make_source = || {
            StaticSource::new(vec![
                packument("a", &[("1.0.0", &[]), ("2.0.0", &[])]),
                packument("b", &[("1.0.0", &[("a", "2.x"), ("c", "*")])]),
                packument("c", &[("3.0.0", &[("a", "^2.0.0")])]),
            ])
        };
        let make_tree = || {
            root_tree(Manifest {
                name: Some("app".to_string()),
                dependencies: deps(&[("a", "1.x"), ("b", "1.x")]),
                ..Default::default()
            })
        };

        let mut first = make_tree();
        build_ideal_tree(&mut first, &make_source()).await.unwrap();
        let mut second = make_tree();
        build_ideal_tree(&mut second, &make_source()).await.unwrap();

        assert_eq!(location_versions(&first), location_versions(&second));
    }

    #[tokio::test]
    async fn test_flags_dev_optional_extraneous() {
        let source = StaticSource::new(vec![
            packument("prod-dep", &[("1.0.0", &[("shared", "*")])]),
            packument("dev-tool", &[("1.0.0", &[("shared", "*")])]),
            packument("shared", &[("1.0.0", &[])]),
            packument("opt-dep", &[("1.0.0", &[])]),
        ]);
        let mut tree = root_tree(Manifest {
            name: Some("app".to_string()),
            dependencies: deps(&[("prod-dep", "*")]),
            dev_dependencies: deps(&[("dev-tool", "*")]),
            optional_dependencies: deps(&[("opt-dep", "*")]),
            ..Default::default()
        });

        build_ideal_tree(&mut tree, &source).await.unwrap();

        let by_loc = |loc: &str| {
            let id = tree.inventory().get_by_location(loc).unwrap();
            tree.node(id).flags
        };

        assert!(!by_loc("node_modules/prod-dep").dev);
        assert!(by_loc("node_modules/dev-tool").dev);
        // Reachable from both worlds: not dev.
        assert!(!by_loc("node_modules/shared").dev);
        assert!(by_loc("node_modules/opt-dep").optional);
        for (_, id) in tree.inventory().iter() {
            assert!(!tree.node(id).flags.extraneous);
        }
    }

    #[tokio::test]
    async fn test_unreferenced_lockfile_node_pruned() {
        // A node seeded from the lockfile with no remaining dependents
        // (its dependency was deleted from the manifest) leaves the
        // ideal tree.
        let source = StaticSource::new(vec![]);
        let mut tree = root_tree(Manifest {
            name: Some("app".to_string()),
            ..Default::default()
        });
        let root = tree.root();
        let leftover = tree.new_node(
            "gone",
            "1.0.0",
            Manifest {
                name: Some("gone".to_string()),
                version: Some("1.0.0".to_string()),
                ..Default::default()
            },
        );
        tree.set_parent(leftover, root);
        assert_eq!(tree.inventory().len(), 2);

        build_ideal_tree(&mut tree, &source).await.unwrap();

        assert_eq!(tree.inventory().len(), 1);
        assert!(!tree.is_attached(leftover));
    }

    #[test]
    fn test_pick_version_exact_precedence() {
        let p = packument("a", &[("1.0.0", &[]), ("1.2.3", &[]), ("2.0.0", &[])]);
        assert_eq!(pick_version(&p, "1.0.0"), Some("1.0.0".to_string()));
        assert_eq!(pick_version(&p, "^1.0.0"), Some("1.2.3".to_string()));
        assert_eq!(pick_version(&p, "*"), Some("2.0.0".to_string()));
        assert_eq!(pick_version(&p, ""), Some("2.0.0".to_string()));
        assert_eq!(pick_version(&p, "^9"), None);
    }

    #[test]
    fn test_pick_version_dist_tag() {
        let mut p = packument("a", &[("1.0.0", &[]), ("2.0.0-rc.1", &[])]);
        p["dist-tags"] = json!({ "latest": "1.0.0", "next": "2.0.0-rc.1" });
        assert_eq!(pick_version(&p, "latest"), Some("1.0.0".to_string()));
        assert_eq!(pick_version(&p, "next"), Some("2.0.0-rc.1".to_string()));
        assert_eq!(pick_version(&p, "nope"), None);
    }
}

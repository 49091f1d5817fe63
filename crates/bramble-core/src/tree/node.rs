//! Node storage for the arena tree.

use super::edge::Edge;
use super::NodeId;
use crate::manifest::Manifest;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Role flags, computed by the builder's flag-fixing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// Reachable only through a development edge at the root.
    pub dev: bool,
    /// Reachable only through optional edges.
    pub optional: bool,
    /// Declares peer dependencies of its own.
    pub peer: bool,
    /// Not reachable from the root at all.
    pub extraneous: bool,
    /// Materialized as a symlink rather than a directory.
    pub link: bool,
}

/// A package in the tree.
///
/// Stored in the tree's arena; all cross-references are [`NodeId`]
/// handles. A node is *in* the tree when reachable through child maps
/// from the root; detached nodes stay in the arena but leave the
/// inventory.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// Declared name: identity under the parent, and the install folder.
    pub name: String,
    /// Installed version.
    pub version: String,
    /// Real registry name, set only when the node was requested through
    /// an `npm:` alias.
    pub registry_name: Option<String>,
    /// Full per-version manifest.
    pub manifest: Manifest,
    /// Resolved tarball URL.
    pub resolved: Option<String>,
    /// SRI integrity string.
    pub integrity: Option<String>,
    /// Role flags.
    pub flags: NodeFlags,
    /// Whether this is the root node.
    pub is_root: bool,
    /// Filesystem path of the project root (root node only).
    pub path: Option<PathBuf>,
    /// Parent handle; `None` for the root and for detached nodes.
    pub parent: Option<NodeId>,
    /// Ordered child map, keyed by declared child name.
    pub children: BTreeMap<String, NodeId>,
    /// Outgoing edges, keyed by declared dependency name.
    pub edges_out: BTreeMap<String, Edge>,
    /// Incoming edges: (from-node, edge name) back-references.
    pub edges_in: BTreeSet<(NodeId, String)>,
    /// Canonical location: `node_modules` hops from the root, empty for
    /// the root itself.
    pub location: String,
}

impl NodeData {
    /// Create a detached node.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>, manifest: Manifest) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            registry_name: None,
            manifest,
            resolved: None,
            integrity: None,
            flags: NodeFlags::default(),
            is_root: false,
            path: None,
            parent: None,
            children: BTreeMap::new(),
            edges_out: BTreeMap::new(),
            edges_in: BTreeSet::new(),
            location: String::new(),
        }
    }

    /// The name used for registry lookups and metadata.
    #[must_use]
    pub fn registry_lookup_name(&self) -> &str {
        self.registry_name.as_deref().unwrap_or(&self.name)
    }

    /// Whether this node's version satisfies a range.
    #[must_use]
    pub fn satisfies(&self, range: &str) -> bool {
        crate::version::satisfies(&self.version, range).unwrap_or(false)
    }
}

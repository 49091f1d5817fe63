//! In-memory dependency tree.
//!
//! Nodes live in an arena owned by [`Tree`]; parent/child/edge
//! references are stable [`NodeId`] handles, so dropping the tree drops
//! every node at once. The [`Inventory`] indexes attached nodes only.

pub mod edge;
pub mod inventory;
pub mod node;

pub use edge::{split_alias, Edge, EdgeError, EdgeKind};
pub use inventory::Inventory;
pub use node::{NodeData, NodeFlags};

use crate::error::PmError;
use crate::manifest::Manifest;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;

/// Stable handle to a node in a [`Tree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[must_use]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A dependency tree: arena, root handle, and inventory.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<NodeData>,
    root: NodeId,
    inventory: Inventory,
}

impl Tree {
    /// Create a tree whose root is the project at `path` described by
    /// `manifest`. Root edges are built immediately.
    #[must_use]
    pub fn new_root(path: PathBuf, manifest: Manifest) -> Self {
        let name = manifest.name.clone().unwrap_or_else(|| "root".to_string());
        let version = manifest.version.clone().unwrap_or_default();

        let mut root_data = NodeData::new(name, version, manifest);
        root_data.is_root = true;
        root_data.path = Some(path);

        let root = NodeId(0);
        let mut tree = Self {
            nodes: vec![root_data],
            root,
            inventory: Inventory::default(),
        };
        let (name, version) = {
            let n = tree.node(root);
            (n.name.clone(), n.version.clone())
        };
        tree.inventory.add(root, &name, &version, String::new());
        tree.build_edges(root);
        tree
    }

    /// Root handle.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Borrow a node.
    ///
    /// # Panics
    /// Panics on a handle from a different tree.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.index()]
    }

    /// Mutably borrow a node.
    #[must_use]
    pub fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.index()]
    }

    /// The inventory of attached nodes.
    #[must_use]
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Create a detached node and build its edges from the manifest.
    pub fn new_node(
        &mut self,
        name: impl Into<String>,
        version: impl Into<String>,
        manifest: Manifest,
    ) -> NodeId {
        let data = NodeData::new(name, version, manifest);
        let id = NodeId(u32::try_from(self.nodes.len()).expect("tree too large"));
        self.nodes.push(data);
        self.build_edges(id);
        id
    }

    /// Create a detached node from a packument `versions` entry, reading
    /// the resolved URL and integrity from `dist`.
    ///
    /// # Errors
    /// Returns `MANIFEST_ERROR` if the version data does not deserialize.
    pub fn node_from_version_data(
        &mut self,
        name: &str,
        version: &str,
        version_data: &Value,
    ) -> Result<NodeId, PmError> {
        let manifest = Manifest::from_value(version_data)?;
        let (resolved, integrity) = match &manifest.dist {
            Some(dist) => (dist.tarball.clone(), dist.integrity.clone()),
            None => (None, None),
        };
        let id = self.new_node(name, version, manifest);
        let node = self.node_mut(id);
        node.resolved = resolved;
        node.integrity = integrity;
        Ok(id)
    }

    /// Whether a node is reachable from the root through child maps.
    #[must_use]
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.root {
                return true;
            }
            match self.node(current).parent {
                Some(p) => current = p,
                None => return false,
            }
        }
    }

    /// Depth of a node: `node_modules` hops from the root.
    #[must_use]
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Some(p) = self.node(current).parent {
            depth += 1;
            current = p;
        }
        depth
    }

    /// The subtree rooted at `id`, including `id`, in BFS order.
    #[must_use]
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            out.push(current);
            queue.extend(self.node(current).children.values().copied());
        }
        out
    }

    /// Atomically re-parent `child` under `parent`, recomputing locations
    /// and edge resolution for the moved subtree.
    ///
    /// # Panics
    /// Panics if `parent` already has a different child under the name;
    /// the placement engine removes it first.
    pub fn set_parent(&mut self, child: NodeId, parent: NodeId) {
        self.detach(child);

        let child_name = self.node(child).name.clone();
        let previous = self
            .node_mut(parent)
            .children
            .insert(child_name.clone(), child);
        assert!(
            previous.is_none() || previous == Some(child),
            "set_parent over an existing child '{child_name}'"
        );
        self.node_mut(child).parent = Some(parent);

        self.relocate_subtree(child);
        for id in self.subtree(child) {
            self.reload_all_edges(id);
        }
    }

    /// Detach `child` from its parent, if any: removes the subtree from
    /// the inventory, clears locations, and unresolves the subtree's
    /// outgoing edges.
    pub fn detach(&mut self, child: NodeId) {
        let subtree = self.subtree(child);

        if let Some(old_parent) = self.node(child).parent {
            let name = self.node(child).name.clone();
            if self.node(old_parent).children.get(&name) == Some(&child) {
                self.node_mut(old_parent).children.remove(&name);
            }
            self.node_mut(child).parent = None;
        }

        for id in subtree {
            let (name, version, location, is_root) = {
                let n = self.node(id);
                (
                    n.name.clone(),
                    n.version.clone(),
                    n.location.clone(),
                    n.is_root,
                )
            };
            if !location.is_empty() || is_root {
                let key = Inventory::location_key(&location, id, is_root);
                self.inventory.remove(id, &name, &version, &key);
            }
            self.node_mut(id).location = String::new();

            // Unresolve outgoing edges so targets drop their back-refs.
            let edge_names: Vec<String> = self.node(id).edges_out.keys().cloned().collect();
            for edge_name in edge_names {
                self.unresolve_edge(id, &edge_name);
            }
        }
    }

    fn unresolve_edge(&mut self, from: NodeId, name: &str) {
        let (old_to, optional) = {
            let edge = self.node(from).edges_out.get(name).expect("edge exists");
            (edge.to, edge.kind.is_optional())
        };
        if let Some(t) = old_to {
            self.node_mut(t)
                .edges_in
                .remove(&(from, name.to_string()));
        }
        let edge = self
            .node_mut(from)
            .edges_out
            .get_mut(name)
            .expect("edge exists");
        edge.to = None;
        if optional {
            edge.valid = true;
            edge.error = None;
        } else {
            edge.valid = false;
            edge.error = Some(EdgeError::Missing);
        }
    }

    /// Recompute locations for the subtree rooted at `id` and re-index it
    /// in the inventory.
    fn relocate_subtree(&mut self, id: NodeId) {
        for current in self.subtree(id) {
            let (name, version, is_root, parent) = {
                let n = self.node(current);
                (n.name.clone(), n.version.clone(), n.is_root, n.parent)
            };
            let new_location = match parent {
                None => String::new(),
                Some(p) => {
                    let parent_loc = &self.node(p).location;
                    if parent_loc.is_empty() {
                        format!("node_modules/{name}")
                    } else {
                        format!("{parent_loc}/node_modules/{name}")
                    }
                }
            };

            let old_location = self.node(current).location.clone();
            if !old_location.is_empty() || is_root {
                let old_key = Inventory::location_key(&old_location, current, is_root);
                self.inventory.remove(current, &name, &version, &old_key);
            }
            self.node_mut(current).location = new_location.clone();
            let new_key = Inventory::location_key(&new_location, current, is_root);
            self.inventory.add(current, &name, &version, new_key);
        }
    }

    /// Resolution walk: own child first, then up through ancestors.
    #[must_use]
    pub fn resolve(&self, from: NodeId, name: &str) -> Option<NodeId> {
        let mut current = Some(from);
        while let Some(id) = current {
            if let Some(&child) = self.node(id).children.get(name) {
                return Some(child);
            }
            current = self.node(id).parent;
        }
        None
    }

    /// Add (or replace) an outgoing edge and resolve it immediately.
    pub fn add_edge(&mut self, from: NodeId, name: &str, spec: &str, kind: EdgeKind) {
        // Drop the back-ref of any edge being replaced.
        if self.node(from).edges_out.contains_key(name) {
            self.unresolve_edge(from, name);
        }
        let edge = Edge::new(name, spec, kind);
        self.node_mut(from).edges_out.insert(name.to_string(), edge);
        self.reload_edge(from, name);
    }

    /// Rebuild the full edge set from the node's declared dependency
    /// maps: production deps, then (root only) development deps, then
    /// optional deps, then peer deps with `peerDependenciesMeta` deciding
    /// peer vs peer-optional. First-declared wins on duplicate names.
    pub fn build_edges(&mut self, id: NodeId) {
        let existing: Vec<String> = self.node(id).edges_out.keys().cloned().collect();
        for name in existing {
            self.unresolve_edge(id, &name);
        }
        self.node_mut(id).edges_out.clear();

        let is_root = self.node(id).is_root;
        let manifest = self.node(id).manifest.clone();

        for (name, spec) in &manifest.dependencies {
            self.add_edge(id, name, spec, EdgeKind::Prod);
        }
        if is_root {
            for (name, spec) in &manifest.dev_dependencies {
                if !self.node(id).edges_out.contains_key(name) {
                    self.add_edge(id, name, spec, EdgeKind::Dev);
                }
            }
        }
        for (name, spec) in &manifest.optional_dependencies {
            if !self.node(id).edges_out.contains_key(name) {
                self.add_edge(id, name, spec, EdgeKind::Optional);
            }
        }
        for (name, spec) in &manifest.peer_dependencies {
            if !self.node(id).edges_out.contains_key(name) {
                let kind = if manifest.peer_is_optional(name) {
                    EdgeKind::PeerOptional
                } else {
                    EdgeKind::Peer
                };
                self.add_edge(id, name, spec, kind);
            }
        }
    }

    /// Re-resolve one edge after a tree-shape mutation.
    pub fn reload_edge(&mut self, from: NodeId, name: &str) {
        let Some(edge) = self.node(from).edges_out.get(name) else {
            return;
        };
        let (old_to, range, kind, edge_name) = (
            edge.to,
            edge.range.clone(),
            edge.kind,
            edge.name.clone(),
        );

        if let Some(t) = old_to {
            self.node_mut(t)
                .edges_in
                .remove(&(from, name.to_string()));
        }

        let target = self.resolve(from, name);
        match target {
            None => {
                let edge = self.node_mut(from).edges_out.get_mut(name).expect("edge");
                edge.to = None;
                if kind.is_optional() {
                    edge.valid = true;
                    edge.error = None;
                } else {
                    edge.valid = false;
                    edge.error = Some(EdgeError::Missing);
                }
            }
            Some(t) => {
                let satisfied = {
                    let target_node = self.node(t);
                    target_node.name == edge_name && target_node.satisfies(&range)
                };
                {
                    let edge = self.node_mut(from).edges_out.get_mut(name).expect("edge");
                    edge.to = Some(t);
                    edge.valid = satisfied;
                    edge.error = if satisfied {
                        None
                    } else {
                        Some(EdgeError::Invalid)
                    };
                }
                self.node_mut(t).edges_in.insert((from, name.to_string()));
            }
        }
    }

    /// Reload every outgoing edge of a node.
    pub fn reload_all_edges(&mut self, id: NodeId) {
        let names: Vec<String> = self.node(id).edges_out.keys().cloned().collect();
        for name in names {
            self.reload_edge(id, &name);
        }
    }

    /// Names of edges that still need resolution work (missing or
    /// invalid, peer edges excluded).
    #[must_use]
    pub fn problem_edges(&self, id: NodeId) -> Vec<String> {
        self.node(id)
            .edges_out
            .values()
            .filter(|e| e.is_problem())
            .map(|e| e.name.clone())
            .collect()
    }

    /// All attached nodes whose name matches and whose version satisfies
    /// the range.
    #[must_use]
    pub fn query(&self, name: &str, range: &str) -> Vec<NodeId> {
        self.inventory
            .get_by_name(name)
            .into_iter()
            .filter(|id| self.node(*id).satisfies(range))
            .collect()
    }
}

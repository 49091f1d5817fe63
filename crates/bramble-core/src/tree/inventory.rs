//! Flat index over every node in a tree.

use super::NodeId;
use std::collections::{BTreeMap, BTreeSet};

/// Three lookup views over the attached nodes of a tree: by canonical
/// location, by declared name (multi-valued), and by `name@version`.
///
/// Holds only non-owning handles; membership tracks attach/detach.
#[derive(Debug, Default, Clone)]
pub struct Inventory {
    by_location: BTreeMap<String, NodeId>,
    by_name: BTreeMap<String, BTreeSet<NodeId>>,
    by_name_version: BTreeMap<String, NodeId>,
}

impl Inventory {
    /// The key a node indexes under: its location, or a stable synthetic
    /// id when it has none.
    #[must_use]
    pub fn location_key(location: &str, id: NodeId, is_root: bool) -> String {
        if location.is_empty() && !is_root {
            format!("#{}", id.index())
        } else {
            location.to_string()
        }
    }

    /// Index a node.
    pub fn add(&mut self, id: NodeId, name: &str, version: &str, location_key: String) {
        self.by_location.insert(location_key, id);
        self.by_name.entry(name.to_string()).or_default().insert(id);
        self.by_name_version
            .insert(format!("{name}@{version}"), id);
    }

    /// Drop a node from all views.
    pub fn remove(&mut self, id: NodeId, name: &str, version: &str, location_key: &str) {
        if self.by_location.get(location_key) == Some(&id) {
            self.by_location.remove(location_key);
        }
        if let Some(set) = self.by_name.get_mut(name) {
            set.remove(&id);
            if set.is_empty() {
                self.by_name.remove(name);
            }
        }
        let nv = format!("{name}@{version}");
        if self.by_name_version.get(&nv) == Some(&id) {
            self.by_name_version.remove(&nv);
        }
    }

    /// Look up a node by canonical location.
    #[must_use]
    pub fn get_by_location(&self, location: &str) -> Option<NodeId> {
        self.by_location.get(location).copied()
    }

    /// All nodes with a declared name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Vec<NodeId> {
        self.by_name
            .get(name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Look up a node by `name@version`.
    #[must_use]
    pub fn get_by_name_version(&self, name: &str, version: &str) -> Option<NodeId> {
        self.by_name_version.get(&format!("{name}@{version}")).copied()
    }

    /// Iterate (location key, node) in location order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.by_location.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of indexed nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_location.len()
    }

    /// Whether the inventory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_location.is_empty()
    }
}

//! Placement engine: where in the tree a resolved dependency may live.
//!
//! Placement prefers the shallowest position that breaks no constraint
//! (hoisting); a deeper copy shadows a shallower one during resolution,
//! which is what makes nesting-on-conflict sound.

use crate::tree::{NodeId, Tree};
use crate::version;
use std::collections::{BTreeSet, HashSet};

/// An executable placement decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceDecision {
    /// No child of that name at the target; add the new node.
    Ok,
    /// An acceptable child already exists; use it.
    Keep(NodeId),
    /// The existing child yields to the candidate: either a strictly
    /// newer satisfying upgrade, or an unsatisfying child nothing else
    /// depends on.
    Replace(NodeId),
}

/// Why a candidate target rejected the dependency.
#[derive(Debug, Clone)]
pub struct PlaceConflict {
    /// The edge that would break.
    pub edge_from: NodeId,
    pub edge_name: String,
    /// The existing child that cannot be displaced, if any.
    pub existing: Option<NodeId>,
}

enum CanPlace {
    Decision(PlaceDecision),
    Conflict(PlaceConflict),
}

/// Decide whether `dep_name@dep_version`, requested by the edge
/// `edge_name` out of `edge_from`, can live directly under `target`.
fn can_place(
    tree: &Tree,
    target: NodeId,
    dep_name: &str,
    dep_version: &str,
    edge_from: NodeId,
    edge_name: &str,
) -> CanPlace {
    let range = tree.node(edge_from).edges_out[edge_name].range.clone();

    if let Some(&existing) = tree.node(target).children.get(dep_name) {
        let existing_version = tree.node(existing).version.clone();

        if existing_version == dep_version {
            return CanPlace::Decision(PlaceDecision::Keep(existing));
        }

        let swap_is_safe = || {
            edges_in_satisfied(tree, existing, dep_version)
                && descendant_conflict(tree, target, dep_name, dep_version, Some(existing))
                    .is_none()
        };

        if !tree.node(existing).satisfies(&range) {
            // The child blocks the requesting edge; it may still be
            // swapped out if nothing else depends on the old version.
            if swap_is_safe() {
                return CanPlace::Decision(PlaceDecision::Replace(existing));
            }
            return CanPlace::Conflict(PlaceConflict {
                edge_from,
                edge_name: edge_name.to_string(),
                existing: Some(existing),
            });
        }

        // Existing satisfies the requesting edge. Upgrade only when the
        // candidate is strictly newer and the swap breaks nothing.
        if version::gt(dep_version, &existing_version) && swap_is_safe() {
            return CanPlace::Decision(PlaceDecision::Replace(existing));
        }
        return CanPlace::Decision(PlaceDecision::Keep(existing));
    }

    // No existing child: the target's own edge must accept the version.
    if let Some(own_edge) = tree.node(target).edges_out.get(dep_name) {
        if !version::satisfies(dep_version, &own_edge.range).unwrap_or(false) {
            return CanPlace::Conflict(PlaceConflict {
                edge_from: target,
                edge_name: dep_name.to_string(),
                existing: None,
            });
        }
    }

    if let Some(conflict) = descendant_conflict(tree, target, dep_name, dep_version, None) {
        return CanPlace::Conflict(conflict);
    }

    CanPlace::Decision(PlaceDecision::Ok)
}

/// Every incoming edge of `existing` must still be satisfied by the
/// replacement version.
fn edges_in_satisfied(tree: &Tree, existing: NodeId, new_version: &str) -> bool {
    for (from, edge_name) in &tree.node(existing).edges_in {
        let Some(edge) = tree.node(*from).edges_out.get(edge_name) else {
            continue;
        };
        if !version::satisfies(new_version, &edge.range).unwrap_or(false) {
            return false;
        }
    }
    true
}

/// Find a descendant of `target` whose edge under `dep_name` would break
/// if `dep_version` were placed at `target`.
///
/// A subtree whose root has its own child of that name is shadowed and
/// skipped wholesale; its resolution cannot reach the new placement.
fn descendant_conflict(
    tree: &Tree,
    target: NodeId,
    dep_name: &str,
    dep_version: &str,
    skip: Option<NodeId>,
) -> Option<PlaceConflict> {
    let mut stack: Vec<NodeId> = tree.node(target).children.values().copied().collect();

    while let Some(id) = stack.pop() {
        if Some(id) == skip {
            continue;
        }
        let node = tree.node(id);
        if node.children.contains_key(dep_name) {
            continue;
        }
        if let Some(edge) = node.edges_out.get(dep_name) {
            if !version::satisfies(dep_version, &edge.range).unwrap_or(false) {
                return Some(PlaceConflict {
                    edge_from: id,
                    edge_name: dep_name.to_string(),
                    existing: None,
                });
            }
        }
        stack.extend(node.children.values().copied());
    }
    None
}

/// Walk from the requesting node up through its ancestors looking for
/// the shallowest position that accepts the dependency.
///
/// Returns the chosen target and decision, or the deepest conflict when
/// no ancestor accepts.
///
/// # Errors
/// Returns the blocking [`PlaceConflict`] when every candidate rejects.
pub fn find_placement(
    tree: &Tree,
    edge_from: NodeId,
    edge_name: &str,
    dep_name: &str,
    dep_version: &str,
) -> Result<(NodeId, PlaceDecision), PlaceConflict> {
    let mut best: Option<(NodeId, PlaceDecision)> = None;
    let mut first_conflict: Option<PlaceConflict> = None;

    let mut candidate = Some(edge_from);
    while let Some(target) = candidate {
        match can_place(tree, target, dep_name, dep_version, edge_from, edge_name) {
            CanPlace::Decision(PlaceDecision::Keep(existing)) => {
                return Ok((target, PlaceDecision::Keep(existing)));
            }
            CanPlace::Decision(decision) => {
                // Walking upward, so each acceptance is shallower than
                // the last.
                best = Some((target, decision));
            }
            CanPlace::Conflict(conflict) => {
                if best.is_some() {
                    break;
                }
                first_conflict.get_or_insert(conflict);
            }
        }
        candidate = tree.node(target).parent;
    }

    best.ok_or_else(|| first_conflict.expect("no decision and no conflict"))
}

/// Execute a placement decision, returning the node now satisfying the
/// edge.
///
/// `Replace` detaches the displaced node's children (subsequent queue
/// entries re-resolve them), removes the node, installs the candidate,
/// and reloads every incoming edge of the displaced node.
pub fn place_dep(
    tree: &mut Tree,
    target: NodeId,
    decision: PlaceDecision,
    new_node: NodeId,
) -> NodeId {
    match decision {
        PlaceDecision::Keep(existing) => existing,
        PlaceDecision::Ok => {
            tree.set_parent(new_node, target);
            new_node
        }
        PlaceDecision::Replace(existing) => {
            let edges_in: Vec<(NodeId, String)> =
                tree.node(existing).edges_in.iter().cloned().collect();
            let children: Vec<NodeId> = tree.node(existing).children.values().copied().collect();

            for child in children {
                tree.detach(child);
            }
            tree.detach(existing);
            tree.set_parent(new_node, target);

            for (from, edge_name) in edges_in {
                tree.reload_edge(from, &edge_name);
            }
            new_node
        }
    }
}

/// An entry in the resolution queue: one problem edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepEntry {
    pub from: NodeId,
    pub edge_name: String,
    pub depth: usize,
    /// Location of the from-node at push time; a displaced from-node can
    /// be re-routed to the current occupant of this location.
    pub from_location: String,
}

/// Resolution work queue, ordered by depth (shallowest first), ties
/// broken lexicographically by edge name. Pushing a
/// `(from-location, name, spec)` key already in the queue is a no-op;
/// the key frees up once its entry pops.
#[derive(Debug, Default)]
pub struct DepsQueue {
    // (depth, edge name, from location, spec, from node)
    entries: BTreeSet<(usize, String, String, String, NodeId)>,
    seen: HashSet<(String, String, String)>,
}

impl DepsQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a problem edge. Returns whether the entry was new.
    pub fn push(&mut self, tree: &Tree, from: NodeId, edge_name: &str) -> bool {
        let Some(edge) = tree.node(from).edges_out.get(edge_name) else {
            return false;
        };
        let location = tree.node(from).location.clone();
        let key = (location.clone(), edge_name.to_string(), edge.spec.clone());
        if !self.seen.insert(key) {
            return false;
        }
        self.entries.insert((
            tree.depth(from),
            edge_name.to_string(),
            location,
            edge.spec.clone(),
            from,
        ));
        true
    }

    /// Pop the next entry: lowest depth, then name.
    pub fn pop(&mut self) -> Option<DepEntry> {
        let (depth, edge_name, from_location, spec, from) = self.entries.pop_first()?;
        self.seen
            .remove(&(from_location.clone(), edge_name.clone(), spec));
        Some(DepEntry {
            from,
            edge_name,
            depth,
            from_location,
        })
    }

    /// Whether any work remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

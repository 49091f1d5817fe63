//! Dependency edges.

use super::NodeId;

/// Dependency relation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Prod,
    Dev,
    Optional,
    Peer,
    PeerOptional,
}

impl EdgeKind {
    /// Kind name as it appears in diagnostics and lockfiles.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prod => "prod",
            Self::Dev => "dev",
            Self::Optional => "optional",
            Self::Peer => "peer",
            Self::PeerOptional => "peerOptional",
        }
    }

    /// Whether a missing target is tolerated.
    #[must_use]
    pub fn is_optional(self) -> bool {
        matches!(self, Self::Optional | Self::PeerOptional)
    }

    /// Whether this is a peer relation (never auto-installed).
    #[must_use]
    pub fn is_peer(self) -> bool {
        matches!(self, Self::Peer | Self::PeerOptional)
    }

    /// Whether this is a development-only relation.
    #[must_use]
    pub fn is_dev(self) -> bool {
        matches!(self, Self::Dev)
    }
}

/// Why an edge is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeError {
    /// No target found and the edge is not optional.
    Missing,
    /// A target was found but does not satisfy the spec.
    Invalid,
}

/// A directed dependency relation from one node to an optional target.
///
/// Owned by the from-node's `edges_out` map under its declared name; the
/// target holds a non-owning back-reference in `edges_in`.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Declared dependency name (the folder name, for aliases).
    pub name: String,
    /// Raw specification string as declared (`^1.2.3`, `npm:real@^1`).
    pub spec: String,
    /// Canonical range: the spec minus any aliasing prefix.
    pub range: String,
    /// Edge type.
    pub kind: EdgeKind,
    /// Real registry package name when the spec is an `npm:` alias.
    pub registry_name: Option<String>,
    /// Resolved target (weak handle; never owning).
    pub to: Option<NodeId>,
    /// Whether the target satisfies the spec.
    pub valid: bool,
    /// Set when invalid.
    pub error: Option<EdgeError>,
}

impl Edge {
    /// Create an unresolved edge, splitting any `npm:` alias prefix into
    /// a registry name and canonical range.
    #[must_use]
    pub fn new(name: impl Into<String>, spec: impl Into<String>, kind: EdgeKind) -> Self {
        let name = name.into();
        let spec = spec.into();
        let (registry_name, range) = split_alias(&spec);
        Self {
            name,
            spec,
            range,
            kind,
            registry_name,
            to: None,
            valid: false,
            error: None,
        }
    }

    /// The package name used for registry lookups: the alias target when
    /// aliased, the declared name otherwise.
    #[must_use]
    pub fn registry_lookup_name(&self) -> &str {
        self.registry_name.as_deref().unwrap_or(&self.name)
    }

    /// Whether this edge still needs resolution work: unresolved, or
    /// resolved to an unsatisfying target. Peer edges are excluded; they
    /// are validated but never auto-installed.
    #[must_use]
    pub fn is_problem(&self) -> bool {
        !self.kind.is_peer() && (self.to.is_none() || !self.valid)
    }
}

/// Split an `npm:` alias spec (case-insensitive prefix) into the real
/// registry name and the remaining range.
///
/// `npm:x@^1` → (`x`, `^1`); `npm:@scope/x@^1` → (`@scope/x`, `^1`);
/// without a version tail the range defaults to `*`.
#[must_use]
pub fn split_alias(spec: &str) -> (Option<String>, String) {
    let trimmed = spec.trim();
    if trimmed.len() < 4 || !trimmed[..4].eq_ignore_ascii_case("npm:") {
        return (None, trimmed.to_string());
    }
    let rest = &trimmed[4..];
    if rest.is_empty() {
        // A bare "npm:" carries no alias target.
        return (None, trimmed.to_string());
    }
    // The version separator is the first '@' past a possible scope marker.
    match rest[1..].find('@').map(|i| i + 1) {
        Some(pos) if !rest[..pos].is_empty() => (
            Some(rest[..pos].to_string()),
            rest[pos + 1..].to_string(),
        ),
        _ => (Some(rest.to_string()), "*".to_string()),
    }
}

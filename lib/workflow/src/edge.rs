//! Edge types for workflow graphs.
//!
//! An edge connects a port of a source node to a target node. Several
//! edges may share a source port (fan-out) or a target node (fan-in).
//! Edge identity is derived from its endpoints, so composing the same
//! connection twice yields one edge.

use crate::node::{NodeId, stable_hash};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Stable identifier of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(Ulid);

impl EdgeId {
    /// Derives the edge ID from its endpoints.
    #[must_use]
    pub fn derive(source: NodeId, port: &str, target: NodeId) -> Self {
        let source = source.to_string();
        let target = target.to_string();
        Self(Ulid::from(stable_hash(&[
            source.as_bytes(),
            port.as_bytes(),
            target.as_bytes(),
        ])))
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edge_{}", self.0)
    }
}

/// A connection from a node's port to a downstream node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Stable identity.
    pub id: EdgeId,
    /// The node owning the source port.
    pub source: NodeId,
    /// The source port name.
    pub port: String,
    /// The downstream node.
    pub target: NodeId,
}

impl Edge {
    /// Creates an edge between a port and a node.
    #[must_use]
    pub fn new(source: NodeId, port: impl Into<String>, target: NodeId) -> Self {
        let port = port.into();
        Self {
            id: EdgeId::derive(source, &port, target),
            source,
            port,
            target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_follows_endpoints() {
        let a = NodeId::from_name("A");
        let b = NodeId::from_name("B");
        assert_eq!(Edge::new(a, "default", b).id, Edge::new(a, "default", b).id);
        assert_ne!(Edge::new(a, "default", b).id, Edge::new(a, "other", b).id);
        assert_ne!(Edge::new(a, "default", b).id, Edge::new(b, "default", a).id);
    }

    #[test]
    fn edge_serde_roundtrip() {
        let edge = Edge::new(NodeId::from_name("A"), "yes", NodeId::from_name("B"));
        let json = serde_json::to_string(&edge).expect("serialize");
        let parsed: Edge = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(edge, parsed);
    }
}

//! Peer identification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identifier, unique within a fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{:016x}", self.0)
    }
}

/// Index of a fabric in the local fabric table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FabricIndex(pub u8);

impl fmt::Display for FabricIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fabric-{}", self.0)
    }
}

/// Fabric-scoped identity of a remote peer.
///
/// Immutable once assigned. Serves as the lookup key into the session table,
/// the in-flight setup registry, and the correlation key for resolver and
/// establisher events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// The peer's node identifier.
    pub node_id: NodeId,
    /// The fabric the peer is reachable on.
    pub fabric_index: FabricIndex,
}

impl PeerIdentity {
    /// Create a new peer identity.
    pub fn new(node_id: NodeId, fabric_index: FabricIndex) -> Self {
        Self {
            node_id,
            fabric_index,
        }
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.node_id, self.fabric_index)
    }
}

//! Fabric and group credential collaborators.
//!
//! These are consumed through narrow interfaces; credential validation
//! itself happens inside the secure channel establisher.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::peer::FabricIndex;

/// Information about a fabric the local node belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricInfo {
    /// Globally unique fabric identifier.
    pub fabric_id: u64,
    /// Human-readable label.
    pub label: String,
}

/// Table of fabrics the local node is commissioned into.
#[derive(Debug, Default)]
pub struct FabricTable {
    fabrics: HashMap<FabricIndex, FabricInfo>,
}

impl FabricTable {
    /// Create an empty fabric table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fabric, replacing any previous entry at the same index.
    pub fn add_fabric(&mut self, index: FabricIndex, info: FabricInfo) {
        self.fabrics.insert(index, info);
    }

    /// Look up a fabric by index.
    pub fn get(&self, index: FabricIndex) -> Option<&FabricInfo> {
        self.fabrics.get(&index)
    }

    /// Check whether a fabric index is known.
    pub fn contains(&self, index: FabricIndex) -> bool {
        self.fabrics.contains_key(&index)
    }

    /// Number of commissioned fabrics.
    pub fn len(&self) -> usize {
        self.fabrics.len()
    }

    /// Check whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.fabrics.is_empty()
    }
}

/// Symmetric group key shared across a fabric.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GroupKey(pub [u8; 16]);

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs.
        write!(f, "GroupKey(..)")
    }
}

/// Provider of per-fabric group keys for handshake parameter assembly.
pub trait GroupKeyProvider: Send + Sync {
    /// The identity protection key for a fabric, if provisioned.
    fn ipk_for(&self, fabric: FabricIndex) -> Option<GroupKey>;
}

/// In-memory group key provider.
#[derive(Default)]
pub struct StaticGroupKeys {
    keys: Mutex<HashMap<FabricIndex, GroupKey>>,
}

impl StaticGroupKeys {
    /// Create an empty key store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a key for a fabric.
    pub fn insert(&self, fabric: FabricIndex, key: GroupKey) {
        self.keys
            .lock()
            .expect("group key store lock poisoned")
            .insert(fabric, key);
    }
}

impl GroupKeyProvider for StaticGroupKeys {
    fn ipk_for(&self, fabric: FabricIndex) -> Option<GroupKey> {
        self.keys
            .lock()
            .expect("group key store lock poisoned")
            .get(&fabric)
            .copied()
    }
}

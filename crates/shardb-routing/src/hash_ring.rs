//! Consistent hash ring with virtual nodes (C1).

use shardb_core::{Error, NodeId, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Stable 32-bit FNV-1a hash. Deterministic across restarts: identical
/// inputs always produce identical outputs.
#[must_use]
pub fn fnv1a_32(input: &str) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Consistent hash ring mapping keys to nodes via virtual-node positions.
///
/// Positions are kept in a `BTreeMap<u32, NodeId>`, which gives the sorted
/// "position array" of the design directly via range queries instead of an
/// explicit re-sort step on every insert.
pub struct HashRing {
    virtual_nodes: u32,
    positions: BTreeMap<u32, NodeId>,
    nodes: BTreeSet<NodeId>,
}

impl HashRing {
    #[must_use]
    pub fn new(virtual_nodes: u32) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            positions: BTreeMap::new(),
            nodes: BTreeSet::new(),
        }
    }

    /// Adds a node, inserting `virtual_nodes` positions for it. Idempotent:
    /// adding an already-present node recomputes its positions in place.
    pub fn add(&mut self, node_id: &NodeId) {
        self.nodes.insert(node_id.clone());
        for i in 0..self.virtual_nodes {
            let position = fnv1a_32(&format!("{node_id}:{i}"));
            self.positions.insert(position, node_id.clone());
        }
    }

    /// Removes a node and all of its virtual-node positions. Idempotent.
    pub fn remove(&mut self, node_id: &NodeId) {
        if !self.nodes.remove(node_id) {
            return;
        }
        self.positions.retain(|_, owner| owner != node_id);
    }

    /// Maps `key` to the owning node: the node holding the smallest position
    /// greater than or equal to `hash(key)`, wrapping to the ring's first
    /// position if `hash(key)` exceeds every position.
    pub fn get(&self, key: &str) -> Result<NodeId> {
        if self.positions.is_empty() {
            return Err(Error::EmptyRing);
        }
        let hash = fnv1a_32(key);
        let owner = self
            .positions
            .range(hash..)
            .next()
            .or_else(|| self.positions.iter().next())
            .map(|(_, node)| node.clone())
            .expect("positions is non-empty, checked above");
        Ok(owner)
    }

    /// Returns every distinct node currently on the ring.
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeId> {
        self.nodes.iter().cloned().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

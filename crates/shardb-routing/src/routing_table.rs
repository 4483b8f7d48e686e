//! Versioned routing table (C3).

use crate::locality::NodeMetrics;
use serde::{Deserialize, Serialize};
use shardb_core::{NodeId, ShardId};
use std::collections::HashMap;

/// Lifecycle status of a node as seen by the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Inactive,
    Recovering,
}

/// Routing-table view of a node: location, metrics, lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub location: String,
    pub latency_ms: f64,
    pub load_factor: f64,
    pub availability: f64,
    pub status: NodeStatus,
}

impl NodeInfo {
    #[must_use]
    pub fn metrics(&self) -> NodeMetrics {
        NodeMetrics {
            latency_ms: self.latency_ms,
            load_factor: self.load_factor,
            availability: self.availability,
        }
    }
}

/// An explicit shard ownership range for a collection: `[lo, hi]` in
/// lexicographic document-id order, owned by one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardRange {
    pub shard_id: ShardId,
    pub lo: String,
    pub hi: String,
    pub node_id: NodeId,
}

impl ShardRange {
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.lo.as_str() <= id && id <= self.hi.as_str()
    }

    /// Whether `[lo,hi]` has non-empty overlap with another inclusive range.
    #[must_use]
    pub fn intersects(&self, lo: &str, hi: &str) -> bool {
        self.lo.as_str() <= hi && lo <= self.hi.as_str()
    }
}

/// Versioned snapshot of collection placement and node liveness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingTable {
    pub version: u64,
    pub nodes: HashMap<NodeId, NodeInfo>,
    pub collections: HashMap<String, Vec<ShardRange>>,
}

impl RoutingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Active nodes serving a given shard range, i.e. just the range's
    /// owning node if it is active (single-primary placement; replica sets
    /// are out of scope for this workspace's in-memory routing table).
    #[must_use]
    pub fn active_nodes_for(&self, node_id: &NodeId) -> bool {
        self.nodes
            .get(node_id)
            .map(|info| info.status == NodeStatus::Active)
            .unwrap_or(false)
    }

    #[must_use]
    pub fn active_node_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, info)| info.status == NodeStatus::Active)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

//! Router (C4): composes the hash ring, locality scorer, and routing table
//! into `route_request` and `shards_for_query`.

use crate::hash_ring::HashRing;
use crate::locality::LocalityScorer;
use crate::routing_table::{NodeStatus, RoutingTable};
use parking_lot::RwLock;
use shardb_core::{Error, NodeId, Result, ShardId, ShardbConfig};
use tracing::{debug, info};

/// A parsed id filter from a query's conditions, used to prune the shard
/// fan-out set when explicit shard ranges are known. Bounds are treated as
/// inclusive even for strict `>`/`<` operators: this only ever widens the
/// candidate set, never drops an owning shard.
#[derive(Debug, Clone, Default)]
pub struct IdFilterHint {
    pub eq: Option<String>,
    pub lo: Option<String>,
    pub hi: Option<String>,
}

impl IdFilterHint {
    #[must_use]
    pub fn equality(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            eq: Some(value),
            lo: None,
            hi: None,
        }
    }

    #[must_use]
    pub fn range(lo: Option<String>, hi: Option<String>) -> Self {
        Self { eq: None, lo, hi }
    }

    fn bounds(&self) -> (String, String) {
        if let Some(eq) = &self.eq {
            return (eq.clone(), eq.clone());
        }
        (
            self.lo.clone().unwrap_or_default(),
            self.hi.clone().unwrap_or_else(|| "\u{10FFFF}".to_string()),
        )
    }
}

/// Composes the ring, locality scorer, and routing table into the routing
/// contract. Single-writer (via `RwLock`, reconciled atomically on
/// `update_routing_table`), many concurrent readers.
pub struct Router {
    table: RwLock<RoutingTable>,
    ring: RwLock<HashRing>,
    locality: LocalityScorer,
    virtual_nodes: u32,
}

impl Router {
    #[must_use]
    pub fn new(config: &ShardbConfig) -> Self {
        Self {
            table: RwLock::new(RoutingTable::new()),
            ring: RwLock::new(HashRing::new(config.virtual_nodes_per_physical)),
            locality: LocalityScorer::new(),
            virtual_nodes: config.virtual_nodes_per_physical,
        }
    }

    #[must_use]
    pub fn with_virtual_nodes(virtual_nodes: u32) -> Self {
        Self {
            table: RwLock::new(RoutingTable::new()),
            ring: RwLock::new(HashRing::new(virtual_nodes)),
            locality: LocalityScorer::new(),
            virtual_nodes,
        }
    }

    /// Adopts `table` if `table.version > current.version`; replaces the
    /// routing table, ring, and locality registrations atomically. Returns
    /// whether the table was adopted.
    pub fn update_routing_table(&self, table: RoutingTable) -> bool {
        let mut current = self.table.write();
        if table.version <= current.version {
            debug!(
                incoming = table.version,
                current = current.version,
                "rejecting stale routing table"
            );
            return false;
        }

        let mut ring = self.ring.write();
        *ring = HashRing::new(self.virtual_nodes);
        for (node_id, info) in &table.nodes {
            if info.status == NodeStatus::Active {
                ring.add(node_id);
                self.locality.register_node(node_id.clone(), info.location.clone());
                self.locality.update_metrics(node_id, info.metrics());
            } else {
                self.locality.remove_node(node_id);
            }
        }
        drop(ring);

        info!(version = table.version, "adopted new routing table");
        *current = table;
        true
    }

    pub fn register_client(&self, client_id: &str, location: &str) {
        self.locality.register_client(client_id, location);
    }

    /// Selects the single shard that owns (collection, id).
    pub fn route_request(
        &self,
        collection: &str,
        id: &str,
        client_id: Option<&str>,
    ) -> Result<ShardId> {
        let table = self.table.read();
        if let Some(ranges) = table.collections.get(collection) {
            if let Some(range) = ranges.iter().find(|r| r.contains(id)) {
                let active_owners: Vec<NodeId> = ranges
                    .iter()
                    .filter(|r| r.shard_id == range.shard_id && table.active_nodes_for(&r.node_id))
                    .map(|r| r.node_id.clone())
                    .collect();

                if active_owners.len() > 1 {
                    let chosen = self.locality.get_optimal_node(client_id, &active_owners)?;
                    debug!(%collection, %id, node = %chosen, "routed via explicit shard range");
                }
                return Ok(range.shard_id.clone());
            }
        }
        drop(table);

        let key = format!("{collection}:{id}");
        let ring = self.ring.read();
        let node = ring.get(&key)?;
        Ok(ShardId::new(format!("shard-{:08x}", crate::hash_ring::fnv1a_32(&node.to_string()))))
    }

    /// Returns the shard set a query against `collection` should fan out to,
    /// pruned by `id_hint` when explicit shard ranges are available.
    #[must_use]
    pub fn shards_for_query(&self, collection: &str, id_hint: Option<&IdFilterHint>) -> Vec<ShardId> {
        let table = self.table.read();
        if let Some(ranges) = table.collections.get(collection) {
            if let Some(hint) = id_hint {
                let (lo, hi) = hint.bounds();
                let mut shard_ids: Vec<ShardId> = ranges
                    .iter()
                    .filter(|r| r.intersects(&lo, &hi))
                    .map(|r| r.shard_id.clone())
                    .collect();
                shard_ids.sort();
                shard_ids.dedup();
                return shard_ids;
            }
            let mut shard_ids: Vec<ShardId> = ranges.iter().map(|r| r.shard_id.clone()).collect();
            shard_ids.sort();
            shard_ids.dedup();
            return shard_ids;
        }

        // Unknown collection: fall back to every active node's hash-routed
        // shard id, matching `route_request`'s own fallback derivation so a
        // document written via the hash path is still found by a query scan.
        table
            .active_node_ids()
            .into_iter()
            .map(|n| ShardId::new(format!("shard-{:08x}", crate::hash_ring::fnv1a_32(&n.to_string()))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing_table::{NodeInfo, ShardRange};

    fn active_node(location: &str) -> NodeInfo {
        NodeInfo {
            location: location.to_string(),
            latency_ms: 10.0,
            load_factor: 0.1,
            availability: 1.0,
            status: NodeStatus::Active,
        }
    }

    #[test]
    fn falls_back_to_hash_routing_without_ranges() {
        let router = Router::with_virtual_nodes(1000);
        let shard1 = router.route_request("users", "u1", None).unwrap();
        let shard2 = router.route_request("users", "u1", None).unwrap();
        assert_eq!(shard1, shard2);
    }

    #[test]
    fn hash_routing_fails_with_no_nodes_registered() {
        let router = Router::with_virtual_nodes(1000);
        assert!(router.route_request("users", "u1", None).is_err());
    }

    #[test]
    fn stale_table_version_is_rejected() {
        let router = Router::with_virtual_nodes(100);
        let mut table = RoutingTable::new();
        table.version = 5;
        assert!(router.update_routing_table(table.clone()));
        let mut older = table;
        older.version = 3;
        assert!(!router.update_routing_table(older));
    }

    #[test]
    fn explicit_range_routes_directly() {
        let router = Router::with_virtual_nodes(100);
        let mut table = RoutingTable::new();
        table.version = 1;
        table
            .nodes
            .insert(NodeId::new("node-1"), active_node("us-east"));
        table.collections.insert(
            "users".to_string(),
            vec![ShardRange {
                shard_id: ShardId::new("shard-a"),
                lo: "a".to_string(),
                hi: "m".to_string(),
                node_id: NodeId::new("node-1"),
            }],
        );
        router.update_routing_table(table);

        let shard = router.route_request("users", "alice", None).unwrap();
        assert_eq!(shard, ShardId::new("shard-a"));
    }

    #[test]
    fn query_pruning_intersects_id_ranges() {
        let router = Router::with_virtual_nodes(100);
        let mut table = RoutingTable::new();
        table.version = 1;
        table.nodes.insert(NodeId::new("n1"), active_node("us-east"));
        table.nodes.insert(NodeId::new("n2"), active_node("us-east"));
        table.collections.insert(
            "users".to_string(),
            vec![
                ShardRange {
                    shard_id: ShardId::new("shard-a"),
                    lo: "a".to_string(),
                    hi: "m".to_string(),
                    node_id: NodeId::new("n1"),
                },
                ShardRange {
                    shard_id: ShardId::new("shard-b"),
                    lo: "n".to_string(),
                    hi: "z".to_string(),
                    node_id: NodeId::new("n2"),
                },
            ],
        );
        router.update_routing_table(table);

        let hint = IdFilterHint::equality("alice");
        let shards = router.shards_for_query("users", Some(&hint));
        assert_eq!(shards, vec![ShardId::new("shard-a")]);

        let all = router.shards_for_query("users", None);
        assert_eq!(all.len(), 2);

        let unknown = router.shards_for_query("unknown_collection", None);
        assert_eq!(unknown.len(), router.table.read().active_node_ids().len());
    }
}

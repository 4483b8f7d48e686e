//! Shard manager (C8): shard/node registry, heartbeat tracking, and a
//! least-loaded assignment + rebalance-trigger policy.

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shardb_core::{Error, NodeId, Result, ShardId};
use std::collections::HashMap;
use tracing::{debug, info};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Online,
    Offline,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardStatus {
    Active,
    Migrating,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub url: String,
    pub region: String,
    pub capacity: u32,
    pub status: NodeStatus,
    pub last_heartbeat_at: i64,
    pub latency_ms: f64,
    pub load_factor: f64,
    pub availability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardRecord {
    pub id: ShardId,
    pub primary_node_id: NodeId,
    pub status: ShardStatus,
    pub created_at: i64,
}

/// A single shard move produced by `trigger_rebalance`: the shard passes
/// through `ShardStatus::Migrating` before ownership flips.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationTask {
    pub shard_id: ShardId,
    pub from_node: NodeId,
    pub to_node: NodeId,
}

struct Inner {
    shards: HashMap<ShardId, ShardRecord>,
    nodes: HashMap<NodeId, NodeRecord>,
    node_order: Vec<NodeId>,
    next_shard_seq: u64,
}

/// Registry of shards and nodes, least-loaded shard assignment, and a
/// rebalance trigger fired on node registration/deregistration.
pub struct ShardManager {
    inner: RwLock<Inner>,
}

impl Default for ShardManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                shards: HashMap::new(),
                nodes: HashMap::new(),
                node_order: Vec::new(),
                next_shard_seq: 0,
            }),
        }
    }

    #[must_use]
    pub fn list_shards(&self) -> Vec<ShardRecord> {
        self.inner.read().shards.values().cloned().collect()
    }

    pub fn get_shard(&self, id: &ShardId) -> Result<ShardRecord> {
        self.inner
            .read()
            .shards
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("shard", id.to_string()))
    }

    /// Creates a shard, assigning it to `primary_node_id` if given, else to
    /// the online node with the fewest shards (ties by registration order).
    pub fn create_shard(&self, primary_node_id: Option<NodeId>) -> Result<ShardRecord> {
        let mut inner = self.inner.write();
        let node_id = match primary_node_id {
            Some(id) => {
                if !inner.nodes.contains_key(&id) {
                    return Err(Error::not_found("node", id.to_string()));
                }
                id
            }
            None => Self::least_loaded_node(&inner)?,
        };

        inner.next_shard_seq += 1;
        let shard_id = ShardId::new(format!("shard-{:04}", inner.next_shard_seq));
        let record = ShardRecord {
            id: shard_id.clone(),
            primary_node_id: node_id,
            status: ShardStatus::Active,
            created_at: now_ms(),
        };
        inner.shards.insert(shard_id, record.clone());
        Ok(record)
    }

    fn least_loaded_node(inner: &Inner) -> Result<NodeId> {
        let mut counts: HashMap<&NodeId, usize> = HashMap::new();
        for node_id in &inner.node_order {
            counts.insert(node_id, 0);
        }
        for shard in inner.shards.values() {
            if let Some(count) = counts.get_mut(&shard.primary_node_id) {
                *count += 1;
            }
        }

        inner
            .node_order
            .iter()
            .filter(|id| {
                inner
                    .nodes
                    .get(*id)
                    .map(|n| n.status == NodeStatus::Online)
                    .unwrap_or(false)
            })
            .min_by_key(|id| counts.get(id).copied().unwrap_or(0))
            .cloned()
            .ok_or_else(|| Error::NoShardsAvailable("no online nodes registered".to_string()))
    }

    pub fn update_shard(&self, id: &ShardId, status: ShardStatus, primary_node_id: Option<NodeId>) -> Result<ShardRecord> {
        let mut inner = self.inner.write();
        let record = inner
            .shards
            .get_mut(id)
            .ok_or_else(|| Error::not_found("shard", id.to_string()))?;
        record.status = status;
        if let Some(node_id) = primary_node_id {
            record.primary_node_id = node_id;
        }
        Ok(record.clone())
    }

    #[must_use]
    pub fn list_nodes(&self) -> Vec<NodeRecord> {
        self.inner.read().nodes.values().cloned().collect()
    }

    pub fn get_node(&self, id: &NodeId) -> Result<NodeRecord> {
        self.inner
            .read()
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("node", id.to_string()))
    }

    /// Registers a new node, returning it and any migrations the resulting
    /// rebalance trigger produces.
    pub fn register_node(&self, url: String, region: String, capacity: u32) -> (NodeRecord, Vec<MigrationTask>) {
        let mut inner = self.inner.write();
        let node_id = NodeId::new(format!("node-{}", inner.node_order.len() + 1));
        let record = NodeRecord {
            id: node_id.clone(),
            url,
            region,
            capacity,
            status: NodeStatus::Online,
            last_heartbeat_at: now_ms(),
            latency_ms: 100.0,
            load_factor: 0.5,
            availability: 1.0,
        };
        inner.nodes.insert(node_id.clone(), record.clone());
        inner.node_order.push(node_id.clone());
        info!(node = %node_id, "node registered");
        let migrations = Self::rebalance(&mut inner);
        (record, migrations)
    }

    /// Updates heartbeat metadata for `node_id`, triggering a rebalance if
    /// the status changed to/from `Online`.
    pub fn heartbeat(
        &self,
        node_id: &NodeId,
        status: Option<NodeStatus>,
        metrics: Option<(f64, f64, f64)>,
    ) -> Result<(NodeRecord, Vec<MigrationTask>)> {
        let mut inner = self.inner.write();
        let was_online = inner
            .nodes
            .get(node_id)
            .map(|n| n.status == NodeStatus::Online)
            .unwrap_or(false);

        {
            let record = inner
                .nodes
                .get_mut(node_id)
                .ok_or_else(|| Error::not_found("node", node_id.to_string()))?;
            record.last_heartbeat_at = now_ms();
            if let Some(status) = status {
                record.status = status;
            }
            if let Some((latency, load, availability)) = metrics {
                record.latency_ms = latency;
                record.load_factor = load;
                record.availability = availability;
            }
        }

        let is_online = inner
            .nodes
            .get(node_id)
            .map(|n| n.status == NodeStatus::Online)
            .unwrap_or(false);

        let migrations = if was_online != is_online {
            Self::rebalance(&mut inner)
        } else {
            Vec::new()
        };

        let record = inner.nodes.get(node_id).cloned().expect("just updated");
        Ok((record, migrations))
    }

    /// Computes an ideal shard-per-node count, then moves shards from
    /// overloaded online nodes to underloaded ones, marking each shard
    /// `Migrating` before flipping ownership.
    fn rebalance(inner: &mut Inner) -> Vec<MigrationTask> {
        let online: Vec<NodeId> = inner
            .node_order
            .iter()
            .filter(|id| {
                inner
                    .nodes
                    .get(*id)
                    .map(|n| n.status == NodeStatus::Online)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if online.is_empty() {
            return Vec::new();
        }

        let total_shards = inner.shards.len();
        let ideal = (total_shards as f64 / online.len() as f64).ceil() as usize;

        let mut counts: HashMap<NodeId, usize> = online.iter().map(|id| (id.clone(), 0)).collect();
        for shard in inner.shards.values() {
            if let Some(count) = counts.get_mut(&shard.primary_node_id) {
                *count += 1;
            }
        }

        let mut migrations = Vec::new();
        loop {
            let Some(overloaded) = counts
                .iter()
                .filter(|(_, &count)| count > ideal)
                .max_by_key(|(_, &count)| count)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            let Some(underloaded) = counts
                .iter()
                .filter(|(id, &count)| **id != overloaded && count < ideal)
                .min_by_key(|(_, &count)| count)
                .map(|(id, _)| id.clone())
            else {
                break;
            };

            let Some(shard_id) = inner
                .shards
                .values()
                .find(|s| s.primary_node_id == overloaded && s.status == ShardStatus::Active)
                .map(|s| s.id.clone())
            else {
                break;
            };

            if let Some(shard) = inner.shards.get_mut(&shard_id) {
                shard.status = ShardStatus::Migrating;
            }
            migrations.push(MigrationTask {
                shard_id: shard_id.clone(),
                from_node: overloaded.clone(),
                to_node: underloaded.clone(),
            });

            if let Some(shard) = inner.shards.get_mut(&shard_id) {
                shard.primary_node_id = underloaded.clone();
                shard.status = ShardStatus::Active;
            }
            debug!(%shard_id, from = %overloaded, to = %underloaded, "shard migrated");
            *counts.get_mut(&overloaded).unwrap() -= 1;
            *counts.get_mut(&underloaded).unwrap() += 1;
        }

        migrations
    }

    /// Hashes `(collection, documentId)` onto the set of managed shards.
    /// Separate from, and simpler than, the Router's consistent-hash ring:
    /// this is an administrative lookup over shard *records*, not a
    /// request-routing decision.
    pub fn lookup_shard(&self, collection: &str, document_id: &str) -> Result<ShardId> {
        let inner = self.inner.read();
        if inner.shards.is_empty() {
            return Err(Error::NoShardsAvailable("no shards registered".to_string()));
        }
        let mut ids: Vec<&ShardId> = inner.shards.keys().collect();
        ids.sort();
        let hash = shardb_core_hash(&format!("{collection}:{document_id}"));
        let index = (hash as usize) % ids.len();
        Ok(ids[index].clone())
    }
}

fn shardb_core_hash(input: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_shard_assigns_least_loaded_online_node() {
        let manager = ShardManager::new();
        let (node_a, _) = manager.register_node("http://a".to_string(), "us-east".to_string(), 10);
        let (node_b, _) = manager.register_node("http://b".to_string(), "us-east".to_string(), 10);

        manager.create_shard(Some(node_a.id.clone())).unwrap();
        let second = manager.create_shard(None).unwrap();
        assert_eq!(second.primary_node_id, node_b.id);
    }

    #[test]
    fn heartbeat_updates_status_and_metrics() {
        let manager = ShardManager::new();
        let (node, _) = manager.register_node("http://a".to_string(), "us-east".to_string(), 10);
        let (updated, _) = manager
            .heartbeat(&node.id, Some(NodeStatus::Draining), Some((50.0, 0.2, 0.9)))
            .unwrap();
        assert_eq!(updated.status, NodeStatus::Draining);
        assert_eq!(updated.latency_ms, 50.0);
    }

    #[test]
    fn registering_node_triggers_rebalance_from_overloaded_peer() {
        let manager = ShardManager::new();
        let (node_a, _) = manager.register_node("http://a".to_string(), "us-east".to_string(), 10);
        for _ in 0..4 {
            manager.create_shard(Some(node_a.id.clone())).unwrap();
        }

        let (_, migrations) = manager.register_node("http://b".to_string(), "us-east".to_string(), 10);
        assert!(!migrations.is_empty());

        let shards = manager.list_shards();
        let node_a_count = shards.iter().filter(|s| s.primary_node_id == node_a.id).count();
        assert!(node_a_count < 4);
    }

    #[test]
    fn lookup_shard_is_deterministic() {
        let manager = ShardManager::new();
        let (node, _) = manager.register_node("http://a".to_string(), "us-east".to_string(), 10);
        manager.create_shard(Some(node.id)).unwrap();

        let first = manager.lookup_shard("users", "u1").unwrap();
        let second = manager.lookup_shard("users", "u1").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn create_shard_fails_with_no_online_nodes() {
        let manager = ShardManager::new();
        assert!(manager.create_shard(None).is_err());
    }
}

//! Shared application state: the router, the shard map it resolves into,
//! the transaction coordinator, and the shard manager.

use crate::resolver::RouterResolver;
use chrono::Utc;
use shardb_core::{MemoryDurableStore, ShardId, ShardbConfig};
use shardb_manager::ShardManager;
use shardb_routing::{fnv1a_32, NodeInfo, NodeStatus as RoutingNodeStatus, Router, RoutingTable};
use shardb_store::ShardStore;
use shardb_txn::{Participant, TransactionCoordinator};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Regions cycled across bootstrap nodes, feeding the locality scorer's
/// static location-latency matrix with recognizable names.
const BOOTSTRAP_REGIONS: [&str; 3] = ["us-east", "us-west", "eu-west"];

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ShardbConfig>,
    pub router: Arc<Router>,
    pub shards: Arc<HashMap<ShardId, Arc<ShardStore>>>,
    pub coordinator: Arc<TransactionCoordinator>,
    pub manager: Arc<ShardManager>,
    pub started_at: i64,
}

impl AppState {
    /// Builds a fresh in-memory deployment: registers `node_count` nodes
    /// with the router (no explicit shard ranges, so routing falls back to
    /// consistent hashing), then creates one in-memory `ShardStore` per
    /// node's hash-derived shard id so the query fan-out path and the
    /// single-document CRUD path agree on shard identity.
    #[must_use]
    pub fn bootstrap(config: ShardbConfig, node_count: usize) -> Self {
        let router = Arc::new(Router::new(&config));
        let mut table = RoutingTable::new();
        table.version = 1;

        let mut shards: HashMap<ShardId, Arc<ShardStore>> = HashMap::new();
        let mut participants: HashMap<ShardId, Arc<dyn Participant>> = HashMap::new();
        let manager = ShardManager::new();

        for i in 0..node_count.max(1) {
            let node_id = shardb_core::NodeId::new(format!("node-{i}"));
            let region = BOOTSTRAP_REGIONS[i % BOOTSTRAP_REGIONS.len()];
            table.nodes.insert(
                node_id.clone(),
                NodeInfo {
                    location: region.to_string(),
                    latency_ms: 10.0,
                    load_factor: 0.1,
                    availability: 1.0,
                    status: RoutingNodeStatus::Active,
                },
            );

            let shard_id = ShardId::new(format!("shard-{:08x}", fnv1a_32(node_id.as_str())));
            let store = Arc::new(ShardStore::new(
                Arc::new(MemoryDurableStore::default()),
                config.clone(),
            ));
            participants.insert(shard_id.clone(), store.clone() as Arc<dyn Participant>);
            shards.insert(shard_id.clone(), store);

            let (record, _migrations) =
                manager.register_node(format!("memory://{node_id}"), region.to_string(), 100);
            let _ = manager.create_shard(Some(record.id));
        }

        let _ = router.update_routing_table(table);

        let resolver = Arc::new(RouterResolver::new(router.clone()));
        let tx_store = Arc::new(MemoryDurableStore::default());
        let coordinator = TransactionCoordinator::new(tx_store, participants, resolver);

        info!(node_count, shard_count = shards.len(), "bootstrapped in-memory deployment");

        Self {
            config: Arc::new(config),
            router,
            shards: Arc::new(shards),
            coordinator,
            manager: Arc::new(manager),
            started_at: Utc::now().timestamp_millis(),
        }
    }
}

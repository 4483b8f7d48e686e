//! Placement & routing: consistent hash ring (C1), locality scorer (C2),
//! and the versioned routing table / router (C3-C4).

pub mod hash_ring;
pub mod locality;
pub mod router;
pub mod routing_table;

pub use hash_ring::{fnv1a_32, HashRing};
pub use locality::{location_distance, LocalityScorer, NodeMetrics};
pub use router::{IdFilterHint, Router};
pub use routing_table::{NodeInfo, NodeStatus, RoutingTable, ShardRange};

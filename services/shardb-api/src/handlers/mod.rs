pub mod data;
pub mod health;
pub mod shards;
pub mod transactions;

pub use data::{delete_document, get_document, put_document, query_collection};
pub use health::health;
pub use shards::{
    create_shard, get_node, get_shard, heartbeat, list_nodes, list_shards, lookup_shard,
    register_node, update_shard,
};
pub use transactions::{abort, aborted, begin, commit, committed, get_transaction, prepare, prepared};

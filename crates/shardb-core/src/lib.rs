//! Domain types, error taxonomy, configuration and the durable-store
//! abstraction shared across the sharded document store workspace.

pub mod config;
pub mod document;
pub mod durable;
pub mod error;
pub mod ids;
pub mod operation;

pub use config::ShardbConfig;
pub use document::{
    compare, strip_reserved, validate_collection_name, validate_document_id, CompareOp, Document,
    RESERVED_KEYS,
};
pub use durable::{DurableStore, MemoryDurableStore};
pub use error::{Error, Result};
pub use ids::{ClientId, NodeId, ShardId, TxId};
pub use operation::{OpType, Operation, PrepareVote};

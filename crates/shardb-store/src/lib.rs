//! Per-shard document store: CRUD, the collection index, filter/sort/page
//! query evaluation, and the participant half of two-phase commit.

pub mod query_types;
pub mod shard_store;

pub use query_types::{
    apply_filters_sort_page, compare_values, sort_documents, FilterCondition, QueryOptions,
    QueryResult, SortKey,
};
pub use shard_store::ShardStore;

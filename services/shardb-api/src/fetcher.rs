//! `ShardFetcher` implementation dispatching a query plan's per-shard
//! targets against this process's own in-memory `ShardStore`s.

use async_trait::async_trait;
use shardb_core::{Error, Result, ShardId};
use shardb_query::{ShardFetchResult, ShardFetcher, ShardTarget};
use shardb_store::ShardStore;
use std::collections::HashMap;
use std::sync::Arc;

pub struct InProcessFetcher {
    shards: Arc<HashMap<ShardId, Arc<ShardStore>>>,
    collection: String,
}

impl InProcessFetcher {
    #[must_use]
    pub fn new(shards: Arc<HashMap<ShardId, Arc<ShardStore>>>, collection: String) -> Self {
        Self { shards, collection }
    }
}

#[async_trait]
impl ShardFetcher for InProcessFetcher {
    async fn fetch(&self, target: &ShardTarget) -> Result<ShardFetchResult> {
        let store = self
            .shards
            .get(&target.shard_id)
            .cloned()
            .ok_or_else(|| Error::not_found("shard", target.shard_id.to_string()))?;

        let result = store
            .query(&self.collection, &target.filters, &target.options)
            .await?;

        Ok(ShardFetchResult {
            shard_id: target.shard_id.clone(),
            results: result.results,
            total: result.total,
            error: None,
        })
    }
}

//! Wires `shardb_store::ShardStore` directly into the coordinator's
//! `Participant` contract: in-process dispatch, no network hop, since this
//! workspace runs every shard in the same process.

use crate::coordinator::Participant;
use async_trait::async_trait;
use shardb_core::{Operation, PrepareVote, Result, TxId};
use shardb_store::ShardStore;

#[async_trait]
impl Participant for ShardStore {
    async fn prepare(&self, tx_id: TxId, ops: &[Operation], expires_at: i64) -> Result<PrepareVote> {
        ShardStore::prepare(self, tx_id, ops, expires_at).await
    }

    async fn commit(&self, tx_id: TxId) -> Result<()> {
        ShardStore::commit(self, tx_id).await
    }

    async fn abort(&self, tx_id: TxId) -> Result<()> {
        ShardStore::abort(self, tx_id).await
    }
}

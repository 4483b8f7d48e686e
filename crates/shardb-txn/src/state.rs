//! Transaction state machine data model (spec §3/§4.7): the status DAG and
//! the durable, serializable `TransactionState`.

use serde::{Deserialize, Serialize};
use shardb_core::{Operation, ShardId, TxId};
use std::collections::{BTreeMap, BTreeSet};

/// Status graph: `PENDING -> PREPARING -> PREPARED -> COMMITTING -> COMMITTED`,
/// with `ABORTING -> ABORTED` reachable from any non-terminal state except
/// once `COMMITTED` is reached. `COMMITTED` and `ABORTED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Pending,
    Preparing,
    Prepared,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

impl TxStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TxStatus::Committed | TxStatus::Aborted)
    }
}

/// Durable, serializable snapshot of one transaction. Sets are marshaled as
/// arrays on the wire (`BTreeSet` serializes as a JSON array via serde),
/// matching the on-disk convention used elsewhere in this store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionState {
    pub tx_id: TxId,
    pub status: TxStatus,
    pub operations: Vec<Operation>,
    pub participants: Vec<ShardId>,
    /// Each participant's filtered operation subset, computed once at
    /// `begin` from the resolver's (collection,id) -> shardId mapping.
    pub ops_by_participant: BTreeMap<ShardId, Vec<Operation>>,
    pub prepared: BTreeSet<ShardId>,
    pub committed: BTreeSet<ShardId>,
    pub aborted: BTreeSet<ShardId>,
    pub started_at: i64,
    pub expires_at: i64,
    pub prepared_at: Option<i64>,
    pub committed_at: Option<i64>,
    pub aborted_at: Option<i64>,
    pub error: Option<String>,
}

impl TransactionState {
    #[must_use]
    pub fn new(
        tx_id: TxId,
        operations: Vec<Operation>,
        participants: Vec<ShardId>,
        ops_by_participant: BTreeMap<ShardId, Vec<Operation>>,
        started_at: i64,
        expires_at: i64,
    ) -> Self {
        Self {
            tx_id,
            status: TxStatus::Pending,
            operations,
            participants,
            ops_by_participant,
            prepared: BTreeSet::new(),
            committed: BTreeSet::new(),
            aborted: BTreeSet::new(),
            started_at,
            expires_at,
            prepared_at: None,
            committed_at: None,
            aborted_at: None,
            error: None,
        }
    }

    /// Operations destined for a single participant shard.
    #[must_use]
    pub fn ops_for(&self, shard_id: &ShardId) -> Vec<Operation> {
        self.ops_by_participant.get(shard_id).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn storage_key(tx_id: TxId) -> String {
        format!("tx:{tx_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_transaction_is_pending_with_no_progress() {
        let state = TransactionState::new(
            TxId::new(),
            vec![],
            vec![ShardId::new("shard-a")],
            BTreeMap::new(),
            0,
            10_000,
        );
        assert_eq!(state.status, TxStatus::Pending);
        assert!(state.prepared.is_empty());
        assert!(!state.status.is_terminal());
    }

    #[test]
    fn committed_and_aborted_are_terminal() {
        assert!(TxStatus::Committed.is_terminal());
        assert!(TxStatus::Aborted.is_terminal());
        assert!(!TxStatus::Preparing.is_terminal());
    }
}

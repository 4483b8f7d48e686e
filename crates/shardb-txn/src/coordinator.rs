//! Transaction coordinator (C7): the 2PC state machine driver, with
//! durable persistence before every external call, per-transaction
//! timeouts, and crash-recoverable resumption.

use crate::state::{TransactionState, TxStatus};
use async_trait::async_trait;
use chrono::Utc;
use shardb_core::{DurableStore, Error, Operation, PrepareVote, Result, ShardId, TxId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// The coordinator's view of a participant shard: the prepare/commit/abort
/// surface a `ShardStore` exposes. Implemented directly by
/// `shardb-store::ShardStore` for in-process dispatch — this workspace has
/// no network plumbing between the coordinator and its shards.
#[async_trait]
pub trait Participant: Send + Sync {
    async fn prepare(&self, tx_id: TxId, ops: &[Operation], expires_at: i64) -> Result<PrepareVote>;
    async fn commit(&self, tx_id: TxId) -> Result<()>;
    async fn abort(&self, tx_id: TxId) -> Result<()>;
}

/// Maps an operation to the shard that owns it. Production wiring backs
/// this with the Router's (collection,id) -> shardId mapping, per the
/// design decision replacing the placeholder one-shard-per-collection
/// mapping the original system used.
pub trait ParticipantResolver: Send + Sync {
    fn resolve(&self, op: &Operation) -> Result<ShardId>;
}

/// Two-phase-commit coordinator. `participants` is the full registry of
/// shards reachable by id; `resolver` derives which shard(s) an op set
/// touches at `begin` time.
pub struct TransactionCoordinator {
    store: Arc<dyn DurableStore>,
    participants: HashMap<ShardId, Arc<dyn Participant>>,
    resolver: Arc<dyn ParticipantResolver>,
    states: Mutex<HashMap<TxId, TransactionState>>,
}

impl TransactionCoordinator {
    /// Returns an `Arc`-wrapped coordinator: one timer per transaction is
    /// spawned as a `tokio` task holding its own clone of this `Arc`, so
    /// construction hands back the `Arc` directly rather than a bare `Self`.
    #[must_use]
    pub fn new(
        store: Arc<dyn DurableStore>,
        participants: HashMap<ShardId, Arc<dyn Participant>>,
        resolver: Arc<dyn ParticipantResolver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            participants,
            resolver,
            states: Mutex::new(HashMap::new()),
        })
    }

    async fn persist(&self, state: &TransactionState) -> Result<()> {
        let bytes = serde_json::to_vec(state)?;
        self.store.put(&TransactionState::storage_key(state.tx_id), bytes).await
    }

    /// Spawns the per-transaction timer required by §4.7: fires
    /// `on_timeout` once `expires_at` passes, driving a transaction still in
    /// `{PENDING, PREPARING, PREPARED}` to ABORTING.
    fn schedule_timeout(self: &Arc<Self>, tx_id: TxId, expires_at: i64) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let remaining = expires_at - now_ms();
            if remaining > 0 {
                tokio::time::sleep(Duration::from_millis(remaining as u64)).await;
            }
            if let Err(err) = coordinator.on_timeout(tx_id).await {
                warn!(%tx_id, error = %err, "timeout handling failed");
            }
        });
    }

    /// `begin(ops, timeoutMs)`.
    pub async fn begin(self: &Arc<Self>, ops: Vec<Operation>, timeout_ms: u64) -> Result<TransactionState> {
        let mut ops_by_participant: BTreeMap<ShardId, Vec<Operation>> = BTreeMap::new();
        for op in &ops {
            let shard_id = self.resolver.resolve(op)?;
            ops_by_participant.entry(shard_id).or_default().push(op.clone());
        }
        let participants: Vec<ShardId> = ops_by_participant.keys().cloned().collect();

        let now = now_ms();
        let tx_id = TxId::new();
        let state = TransactionState::new(
            tx_id,
            ops,
            participants,
            ops_by_participant,
            now,
            now + timeout_ms as i64,
        );

        self.persist(&state).await?;
        self.states.lock().await.insert(tx_id, state.clone());
        self.schedule_timeout(tx_id, state.expires_at);
        info!(%tx_id, participants = state.participants.len(), "transaction begun");
        Ok(state)
    }

    fn participant_for(&self, shard_id: &ShardId) -> Result<Arc<dyn Participant>> {
        self.participants
            .get(shard_id)
            .cloned()
            .ok_or_else(|| Error::not_found("shard", shard_id.to_string()))
    }

    /// `prepare(txId)`.
    pub async fn prepare(&self, tx_id: TxId) -> Result<TransactionState> {
        let mut states = self.states.lock().await;
        let state = states
            .get_mut(&tx_id)
            .ok_or_else(|| Error::not_found("transaction", tx_id.to_string()))?;

        if state.status != TxStatus::Pending && state.status != TxStatus::Preparing {
            return Err(Error::TransactionConflict(format!(
                "cannot prepare from status {:?}",
                state.status
            )));
        }
        state.status = TxStatus::Preparing;
        self.persist(state).await?;

        let mut failed = false;
        for shard_id in state.participants.clone() {
            let participant = match self.participant_for(&shard_id) {
                Ok(p) => p,
                Err(err) => {
                    warn!(%tx_id, %shard_id, error = %err, "participant unreachable during prepare");
                    failed = true;
                    break;
                }
            };
            let ops = state.ops_for(&shard_id);
            match participant.prepare(tx_id, &ops, state.expires_at).await {
                Ok(PrepareVote::Ok) => {
                    state.prepared.insert(shard_id);
                }
                Ok(PrepareVote::Abort) => {
                    debug!(%tx_id, %shard_id, "participant voted to abort");
                    failed = true;
                    break;
                }
                Err(err) => {
                    warn!(%tx_id, %shard_id, error = %err, "prepare call failed");
                    failed = true;
                    break;
                }
            }
        }

        if failed || state.prepared.len() != state.participants.len() {
            state.status = TxStatus::Aborting;
            state.error = Some("prepare failed".to_string());
            self.persist(state).await?;
            let state_clone = state.clone();
            drop(states);
            return self.drive_abort(state_clone).await;
        }

        state.status = TxStatus::Prepared;
        state.prepared_at = Some(now_ms());
        self.persist(state).await?;
        info!(%tx_id, "prepared");
        Ok(state.clone())
    }

    /// `commit(txId)`. Only valid from `PREPARED`; failures keep the state
    /// `COMMITTING` for an external caller to retry (never abort after
    /// `PREPARED`).
    pub async fn commit(&self, tx_id: TxId) -> Result<TransactionState> {
        let mut states = self.states.lock().await;
        let state = states
            .get_mut(&tx_id)
            .ok_or_else(|| Error::not_found("transaction", tx_id.to_string()))?;

        if state.status != TxStatus::Prepared && state.status != TxStatus::Committing {
            return Err(Error::TransactionConflict(format!(
                "cannot commit from status {:?}",
                state.status
            )));
        }
        state.status = TxStatus::Committing;
        self.persist(state).await?;

        for shard_id in state.participants.clone() {
            if state.committed.contains(&shard_id) {
                continue;
            }
            let participant = self.participant_for(&shard_id)?;
            match participant.commit(tx_id).await {
                Ok(()) => {
                    state.committed.insert(shard_id);
                }
                Err(err) => {
                    warn!(%tx_id, %shard_id, error = %err, "commit call failed, will retry");
                }
            }
        }

        if state.committed.len() == state.participants.len() {
            state.status = TxStatus::Committed;
            state.committed_at = Some(now_ms());
            self.persist(state).await?;
            info!(%tx_id, "committed");
        } else {
            self.persist(state).await?;
        }
        Ok(state.clone())
    }

    /// `abort(txId)`. Allowed from any non-terminal, non-committing state.
    pub async fn abort(&self, tx_id: TxId) -> Result<TransactionState> {
        let mut states = self.states.lock().await;
        let state = states
            .get_mut(&tx_id)
            .ok_or_else(|| Error::not_found("transaction", tx_id.to_string()))?;

        if matches!(state.status, TxStatus::Committing | TxStatus::Committed) {
            return Err(Error::TransactionConflict(
                "cannot abort a transaction that is committing or committed".to_string(),
            ));
        }
        state.status = TxStatus::Aborting;
        self.persist(state).await?;
        let state_clone = state.clone();
        drop(states);
        self.drive_abort(state_clone).await
    }

    async fn drive_abort(&self, mut state: TransactionState) -> Result<TransactionState> {
        for shard_id in state.participants.clone() {
            if state.aborted.contains(&shard_id) {
                continue;
            }
            match self.participant_for(&shard_id) {
                Ok(participant) => match participant.abort(state.tx_id).await {
                    Ok(()) => {
                        state.aborted.insert(shard_id);
                    }
                    Err(err) => {
                        warn!(tx_id = %state.tx_id, %shard_id, error = %err, "abort call failed, will retry");
                    }
                },
                Err(err) => {
                    warn!(tx_id = %state.tx_id, %shard_id, error = %err, "participant unreachable during abort");
                }
            }
        }

        if state.aborted.len() == state.participants.len() {
            state.status = TxStatus::Aborted;
            state.aborted_at = Some(now_ms());
        }
        self.persist(&state).await?;
        self.states.lock().await.insert(state.tx_id, state.clone());
        info!(tx_id = %state.tx_id, status = ?state.status, "abort driven");
        Ok(state)
    }

    /// Participant callback: `prepared`/`committed`/`aborted` notifications
    /// arriving asynchronously (the HTTP-level path, idempotent and
    /// guarded by current status like the direct prepare/commit/abort calls).
    pub async fn on_participant_prepared(&self, tx_id: TxId, shard_id: ShardId) -> Result<()> {
        let mut states = self.states.lock().await;
        let state = states
            .get_mut(&tx_id)
            .ok_or_else(|| Error::not_found("transaction", tx_id.to_string()))?;
        state.prepared.insert(shard_id);
        if state.prepared.len() == state.participants.len() && state.status == TxStatus::Preparing
        {
            state.status = TxStatus::Prepared;
            state.prepared_at = Some(now_ms());
        }
        self.persist(state).await
    }

    pub async fn on_participant_committed(&self, tx_id: TxId, shard_id: ShardId) -> Result<()> {
        let mut states = self.states.lock().await;
        let state = states
            .get_mut(&tx_id)
            .ok_or_else(|| Error::not_found("transaction", tx_id.to_string()))?;
        state.committed.insert(shard_id);
        if state.committed.len() == state.participants.len() {
            state.status = TxStatus::Committed;
            state.committed_at = Some(now_ms());
        }
        self.persist(state).await
    }

    pub async fn on_participant_aborted(&self, tx_id: TxId, shard_id: ShardId) -> Result<()> {
        let mut states = self.states.lock().await;
        let state = states
            .get_mut(&tx_id)
            .ok_or_else(|| Error::not_found("transaction", tx_id.to_string()))?;
        state.aborted.insert(shard_id);
        if state.aborted.len() == state.participants.len() {
            state.status = TxStatus::Aborted;
            state.aborted_at = Some(now_ms());
        }
        self.persist(state).await
    }

    /// Fires a transaction's timeout: if still in a non-terminal,
    /// non-committing state, drives it to `ABORTING`/`ABORTED`.
    pub async fn on_timeout(&self, tx_id: TxId) -> Result<()> {
        let state = {
            let states = self.states.lock().await;
            states.get(&tx_id).cloned()
        };
        let Some(state) = state else { return Ok(()) };
        if matches!(
            state.status,
            TxStatus::Pending | TxStatus::Preparing | TxStatus::Prepared
        ) {
            warn!(%tx_id, "transaction timed out, aborting");
            self.abort(tx_id).await?;
        }
        Ok(())
    }

    /// Reloads every non-terminal transaction from durable state (process
    /// restart recovery) and re-drives it: `PREPARING` retries prepare,
    /// `PREPARED`/`COMMITTING` retries commit (or aborts if expired),
    /// `ABORTING` retries abort.
    pub async fn recover(self: &Arc<Self>) -> Result<Vec<TxId>> {
        let mut recovered = Vec::new();
        for key in self.store.list("tx:").await? {
            let Some(bytes) = self.store.get(&key).await? else {
                continue;
            };
            let state: TransactionState = serde_json::from_slice(&bytes)?;
            if state.status.is_terminal() {
                continue;
            }
            self.states.lock().await.insert(state.tx_id, state.clone());
            recovered.push(state.tx_id);

            match state.status {
                TxStatus::Pending | TxStatus::Preparing => {
                    self.prepare(state.tx_id).await?;
                }
                TxStatus::Prepared | TxStatus::Committing => {
                    if now_ms() >= state.expires_at {
                        self.abort(state.tx_id).await?;
                    } else {
                        self.commit(state.tx_id).await?;
                    }
                }
                TxStatus::Aborting => {
                    self.drive_abort(state).await?;
                }
                TxStatus::Committed | TxStatus::Aborted => {}
            }

            if let Some(current) = self.get(state.tx_id).await {
                if !current.status.is_terminal() {
                    self.schedule_timeout(state.tx_id, current.expires_at);
                }
            }
        }
        info!(count = recovered.len(), "recovered in-flight transactions");
        Ok(recovered)
    }

    #[must_use]
    pub async fn get(&self, tx_id: TxId) -> Option<TransactionState> {
        self.states.lock().await.get(&tx_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use shardb_core::{MemoryDurableStore, ShardbConfig};
    use shardb_store::ShardStore;

    struct CollectionResolver(HashMap<String, ShardId>);

    impl ParticipantResolver for CollectionResolver {
        fn resolve(&self, op: &Operation) -> Result<ShardId> {
            self.0
                .get(&op.collection)
                .cloned()
                .ok_or_else(|| Error::NoShardsAvailable(op.collection.clone()))
        }
    }

    struct AbortingParticipant;

    #[async_trait]
    impl Participant for AbortingParticipant {
        async fn prepare(&self, _tx_id: TxId, _ops: &[Operation], _expires_at: i64) -> Result<PrepareVote> {
            Ok(PrepareVote::Abort)
        }
        async fn commit(&self, _tx_id: TxId) -> Result<()> {
            Ok(())
        }
        async fn abort(&self, _tx_id: TxId) -> Result<()> {
            Ok(())
        }
    }

    fn write_op(collection: &str, id: &str) -> Operation {
        let mut data = Map::new();
        data.insert("name".to_string(), json!("Alice"));
        Operation::write(collection, id, data)
    }

    #[tokio::test]
    async fn happy_path_prepare_then_commit_reaches_committed() {
        let users_store = Arc::new(ShardStore::new(
            Arc::new(MemoryDurableStore::new()),
            ShardbConfig::default(),
        ));
        let orders_store = Arc::new(ShardStore::new(
            Arc::new(MemoryDurableStore::new()),
            ShardbConfig::default(),
        ));

        let mut participants: HashMap<ShardId, Arc<dyn Participant>> = HashMap::new();
        participants.insert(ShardId::new("shard-users"), users_store.clone());
        participants.insert(ShardId::new("shard-orders"), orders_store.clone());

        let mut mapping = HashMap::new();
        mapping.insert("users".to_string(), ShardId::new("shard-users"));
        mapping.insert("orders".to_string(), ShardId::new("shard-orders"));

        let coordinator = TransactionCoordinator::new(
            Arc::new(MemoryDurableStore::new()),
            participants,
            Arc::new(CollectionResolver(mapping)),
        );

        let ops = vec![write_op("users", "u1"), write_op("orders", "o1")];
        let begun = coordinator.begin(ops, 10_000).await.unwrap();
        assert_eq!(begun.participants.len(), 2);

        let prepared = coordinator.prepare(begun.tx_id).await.unwrap();
        assert_eq!(prepared.status, TxStatus::Prepared);

        let committed = coordinator.commit(begun.tx_id).await.unwrap();
        assert_eq!(committed.status, TxStatus::Committed);

        let doc = users_store.get("users", "u1").await.unwrap();
        assert_eq!(doc.version, 1);
    }

    #[tokio::test]
    async fn prepare_failure_drives_abort_on_all_participants() {
        let users_store = Arc::new(ShardStore::new(
            Arc::new(MemoryDurableStore::new()),
            ShardbConfig::default(),
        ));

        let mut participants: HashMap<ShardId, Arc<dyn Participant>> = HashMap::new();
        participants.insert(ShardId::new("shard-users"), users_store.clone());
        participants.insert(ShardId::new("shard-orders"), Arc::new(AbortingParticipant));

        let mut mapping = HashMap::new();
        mapping.insert("users".to_string(), ShardId::new("shard-users"));
        mapping.insert("orders".to_string(), ShardId::new("shard-orders"));

        let coordinator = TransactionCoordinator::new(
            Arc::new(MemoryDurableStore::new()),
            participants,
            Arc::new(CollectionResolver(mapping)),
        );

        let ops = vec![write_op("users", "u1"), write_op("orders", "o1")];
        let begun = coordinator.begin(ops, 10_000).await.unwrap();
        let result = coordinator.prepare(begun.tx_id).await.unwrap();
        assert_eq!(result.status, TxStatus::Aborted);

        assert!(matches!(
            users_store.get("users", "u1").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn restart_during_committing_finishes_the_commit() {
        let users_store = Arc::new(ShardStore::new(
            Arc::new(MemoryDurableStore::new()),
            ShardbConfig::default(),
        ));
        let orders_store = Arc::new(ShardStore::new(
            Arc::new(MemoryDurableStore::new()),
            ShardbConfig::default(),
        ));

        let mut participants: HashMap<ShardId, Arc<dyn Participant>> = HashMap::new();
        participants.insert(ShardId::new("shard-users"), users_store.clone());
        participants.insert(ShardId::new("shard-orders"), orders_store.clone());

        let tx_store: Arc<dyn DurableStore> = Arc::new(MemoryDurableStore::new());

        let mut mapping = HashMap::new();
        mapping.insert("users".to_string(), ShardId::new("shard-users"));
        mapping.insert("orders".to_string(), ShardId::new("shard-orders"));

        let coordinator = TransactionCoordinator::new(
            tx_store.clone(),
            participants.clone(),
            Arc::new(CollectionResolver(mapping.clone())),
        );

        let ops = vec![write_op("users", "u1"), write_op("orders", "o1")];
        let begun = coordinator.begin(ops, 10_000).await.unwrap();
        coordinator.prepare(begun.tx_id).await.unwrap();

        // Manually acknowledge only the `users` shard's commit, then persist
        // a COMMITTING snapshot reflecting a coordinator crash mid-commit.
        users_store.commit(begun.tx_id).await.unwrap();
        let mut mid_crash = coordinator.get(begun.tx_id).await.unwrap();
        mid_crash.status = TxStatus::Committing;
        mid_crash.committed.insert(ShardId::new("shard-users"));
        let bytes = serde_json::to_vec(&mid_crash).unwrap();
        tx_store
            .put(&TransactionState::storage_key(begun.tx_id), bytes)
            .await
            .unwrap();

        // Simulate restart: a fresh coordinator over the same durable state.
        let restarted = TransactionCoordinator::new(
            tx_store,
            participants,
            Arc::new(CollectionResolver(mapping)),
        );
        restarted.recover().await.unwrap();

        let final_state = restarted.get(begun.tx_id).await.unwrap();
        assert_eq!(final_state.status, TxStatus::Committed);

        let doc = orders_store.get("orders", "o1").await.unwrap();
        assert_eq!(doc.version, 1);
    }
}

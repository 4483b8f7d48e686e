//! Per-shard document store (C5): CRUD, the collection index, filter/sort
//! pagination, and the participant half of two-phase commit.
//!
//! All mutating entry points funnel through a single `tokio::sync::Mutex`
//! guarding the in-memory collection index and the lock table, realizing
//! the "shard-local single-writer" model of the design notes without a
//! literal actor thread: the mutex is held across the durable-store awaits
//! that make up one logical operation, so two PUTs against the same shard
//! never interleave.

use crate::query_types::{apply_filters_sort_page, FilterCondition, QueryOptions, QueryResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shardb_core::{
    strip_reserved, validate_collection_name, validate_document_id, Document, DurableStore,
    Error, OpType, Operation, PrepareVote, Result, ShardbConfig, TxId,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const INDEX_KEY: &str = "__collections";

fn doc_key(collection: &str, id: &str) -> String {
    format!("{collection}:{id}")
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedIndex {
    #[serde(flatten)]
    collections: HashMap<String, Vec<String>>,
}

struct LockEntry {
    tx_id: TxId,
    expires_at: i64,
}

struct StagedTx {
    ops: Vec<Operation>,
    expires_at: i64,
}

#[derive(Default)]
struct Inner {
    index: HashMap<String, BTreeSet<String>>,
    locks: HashMap<(String, String), LockEntry>,
    staged: HashMap<TxId, StagedTx>,
    committed: HashSet<TxId>,
}

impl Inner {
    fn add_to_index(&mut self, collection: &str, id: &str) {
        self.index
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string());
    }

    fn remove_from_index(&mut self, collection: &str, id: &str) {
        if let Some(set) = self.index.get_mut(collection) {
            set.remove(id);
            if set.is_empty() {
                self.index.remove(collection);
            }
        }
    }

    fn release_expired_lock(&mut self, key: &(String, String)) {
        let expired = self
            .locks
            .get(key)
            .map(|lock| now_ms() >= lock.expires_at)
            .unwrap_or(false);
        if expired {
            if let Some(lock) = self.locks.remove(key) {
                warn!(tx_id = %lock.tx_id, "lock auto-released after expiry");
                self.staged.remove(&lock.tx_id);
            }
        }
    }
}

/// A single shard's document store, backed by an opaque durable
/// key-value store.
pub struct ShardStore {
    store: Arc<dyn DurableStore>,
    config: ShardbConfig,
    inner: Mutex<Inner>,
}

impl ShardStore {
    /// Creates a store over an empty durable backend.
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, config: ShardbConfig) -> Self {
        Self {
            store,
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Opens a store, reconstructing the collection index from the
    /// persisted `__collections` key if present, else by a full
    /// list-by-prefix scan of document keys.
    pub async fn open(store: Arc<dyn DurableStore>, config: ShardbConfig) -> Result<Self> {
        let mut index: HashMap<String, BTreeSet<String>> = HashMap::new();
        if let Some(bytes) = store.get(INDEX_KEY).await? {
            let persisted: PersistedIndex = serde_json::from_slice(&bytes)?;
            for (collection, ids) in persisted.collections {
                index.insert(collection, ids.into_iter().collect());
            }
        } else {
            for key in store.list("").await? {
                if key == INDEX_KEY {
                    continue;
                }
                if let Some((collection, id)) = key.split_once(':') {
                    index.entry(collection.to_string()).or_default().insert(id.to_string());
                }
            }
        }

        Ok(Self {
            store,
            config,
            inner: Mutex::new(Inner {
                index,
                ..Inner::default()
            }),
        })
    }

    async fn persist_index(&self, inner: &Inner) -> Result<()> {
        let collections = inner
            .index
            .iter()
            .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
            .collect();
        let bytes = serde_json::to_vec(&PersistedIndex { collections })?;
        self.store.put(INDEX_KEY, bytes).await
    }

    async fn load_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        match self.store.get(&doc_key(collection, id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save_document(&self, doc: &Document) -> Result<()> {
        let bytes = serde_json::to_vec(doc)?;
        self.store.put(&doc_key(&doc.collection, &doc.id), bytes).await
    }

    /// `GET(coll, id)`.
    pub async fn get(&self, collection: &str, id: &str) -> Result<Document> {
        self.load_document(collection, id)
            .await?
            .ok_or_else(|| Error::not_found("document", format!("{collection}/{id}")))
    }

    /// `PUT(coll, id, payload)`. Returns the resulting document and whether
    /// it was newly created (HTTP 201 vs 200 semantics).
    pub async fn put(
        &self,
        collection: &str,
        id: &str,
        payload: Map<String, Value>,
    ) -> Result<(Document, bool)> {
        validate_collection_name(collection)?;
        validate_document_id(id)?;
        let clean = strip_reserved(&payload)?;

        let mut inner = self.inner.lock().await;
        let existing = self.load_document(collection, id).await?;
        let now = now_ms();
        let created = existing.is_none();
        let doc = match existing {
            Some(mut doc) => {
                doc.payload = clean;
                doc.version += 1;
                doc.updated_at = now;
                doc
            }
            None => Document {
                id: id.to_string(),
                collection: collection.to_string(),
                version: 1,
                created_at: now,
                updated_at: now,
                payload: clean,
            },
        };

        let size = doc.payload_size()?;
        if size > self.config.max_doc_bytes {
            return Err(Error::DocumentTooLarge {
                max_bytes: self.config.max_doc_bytes,
            });
        }

        self.save_document(&doc).await?;
        if created {
            inner.add_to_index(collection, id);
            self.persist_index(&inner).await?;
        }
        debug!(%collection, %id, version = doc.version, "document written");
        Ok((doc, created))
    }

    /// `DELETE(coll, id)`.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if self.load_document(collection, id).await?.is_none() {
            return Err(Error::not_found("document", format!("{collection}/{id}")));
        }
        self.store.delete(&doc_key(collection, id)).await?;
        inner.remove_from_index(collection, id);
        self.persist_index(&inner).await?;
        info!(%collection, %id, "document deleted");
        Ok(())
    }

    /// `QUERY(coll, filters, options)`.
    pub async fn query(
        &self,
        collection: &str,
        filters: &[FilterCondition],
        options: &QueryOptions,
    ) -> Result<QueryResult> {
        let ids: Vec<String> = {
            let inner = self.inner.lock().await;
            inner
                .index
                .get(collection)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()
        };

        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.load_document(collection, &id).await? {
                docs.push(doc);
            }
        }

        Ok(apply_filters_sort_page(docs, filters, options))
    }

    // ---- 2PC participant ----

    /// `PREPARE(txId, ops, expiresAt)`.
    pub async fn prepare(
        &self,
        tx_id: TxId,
        ops: &[Operation],
        expires_at: i64,
    ) -> Result<PrepareVote> {
        let mut inner = self.inner.lock().await;
        let mut acquired = Vec::new();

        for op in ops {
            if let Err(err) = validate_op(op, self.config.max_doc_bytes) {
                warn!(%tx_id, error = %err, "prepare validation failed, voting to abort");
                release_locks(&mut inner, &acquired);
                return Ok(PrepareVote::Abort);
            }

            let key = (op.collection.clone(), op.document_id.clone());
            inner.release_expired_lock(&key);
            match inner.locks.get(&key) {
                Some(lock) if lock.tx_id != tx_id => {
                    warn!(%tx_id, ?key, "lock contention, voting to abort");
                    release_locks(&mut inner, &acquired);
                    return Ok(PrepareVote::Abort);
                }
                _ => {
                    inner.locks.insert(
                        key.clone(),
                        LockEntry {
                            tx_id,
                            expires_at,
                        },
                    );
                    acquired.push(key);
                }
            }
        }

        inner.staged.insert(
            tx_id,
            StagedTx {
                ops: ops.to_vec(),
                expires_at,
            },
        );
        info!(%tx_id, participants = ops.len(), "prepared");
        Ok(PrepareVote::Ok)
    }

    /// `COMMIT(txId)`. Idempotent: replaying a commit for an already
    /// committed transaction reapplies nothing and succeeds.
    pub async fn commit(&self, tx_id: TxId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.committed.contains(&tx_id) {
            debug!(%tx_id, "commit replay, already applied");
            return Ok(());
        }

        let staged = match inner.staged.remove(&tx_id) {
            Some(staged) => staged,
            None => {
                // Unknown transaction with no staged ops: treat as a no-op
                // commit so a late-arriving replay never fails loudly.
                inner.committed.insert(tx_id);
                return Ok(());
            }
        };

        for op in &staged.ops {
            match op.op_type {
                OpType::Write => {
                    let data = op.data.clone().unwrap_or_default();
                    drop(inner);
                    self.put(&op.collection, &op.document_id, data).await?;
                    inner = self.inner.lock().await;
                }
                OpType::Delete => {
                    drop(inner);
                    match self.delete(&op.collection, &op.document_id).await {
                        Ok(()) | Err(Error::NotFound { .. }) => {}
                        Err(err) => return Err(err),
                    }
                    inner = self.inner.lock().await;
                }
                OpType::Read => {}
            }
        }

        for op in &staged.ops {
            inner
                .locks
                .remove(&(op.collection.clone(), op.document_id.clone()));
        }
        inner.committed.insert(tx_id);
        info!(%tx_id, "committed");
        Ok(())
    }

    /// `ABORT(txId)`. Idempotent.
    pub async fn abort(&self, tx_id: TxId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(staged) = inner.staged.remove(&tx_id) {
            for op in &staged.ops {
                inner
                    .locks
                    .remove(&(op.collection.clone(), op.document_id.clone()));
            }
        }
        info!(%tx_id, "aborted");
        Ok(())
    }
}

fn release_locks(inner: &mut Inner, keys: &[(String, String)]) {
    for key in keys {
        inner.locks.remove(key);
    }
}

fn validate_op(op: &Operation, max_doc_bytes: usize) -> Result<()> {
    validate_collection_name(&op.collection)?;
    validate_document_id(&op.document_id)?;
    if op.op_type == OpType::Write {
        let data = op
            .data
            .as_ref()
            .ok_or_else(|| Error::InvalidDocument("WRITE op missing data".to_string()))?;
        let clean = strip_reserved(data)?;
        let size = serde_json::to_vec(&clean)?.len();
        if size > max_doc_bytes {
            return Err(Error::DocumentTooLarge { max_bytes: max_doc_bytes });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shardb_core::MemoryDurableStore;

    fn store() -> ShardStore {
        ShardStore::new(Arc::new(MemoryDurableStore::new()), ShardbConfig::default())
    }

    #[tokio::test]
    async fn put_then_get_round_trips_payload() {
        let store = store();
        let payload = json!({"name": "Alice"}).as_object().unwrap().clone();
        let (doc, created) = store.put("users", "u1", payload.clone()).await.unwrap();
        assert!(created);
        assert_eq!(doc.version, 1);

        let fetched = store.get("users", "u1").await.unwrap();
        assert_eq!(fetched.payload, payload);
    }

    #[tokio::test]
    async fn put_twice_increments_version_and_keeps_created_at() {
        let store = store();
        let p1 = json!({"name": "Alice"}).as_object().unwrap().clone();
        let (first, _) = store.put("users", "u1", p1).await.unwrap();

        let p2 = json!({"name": "Alice2"}).as_object().unwrap().clone();
        let (second, created) = store.put("users", "u1", p2).await.unwrap();

        assert!(!created);
        assert_eq!(second.version, 2);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let store = store();
        let payload = json!({"a": 1}).as_object().unwrap().clone();
        store.put("users", "u1", payload).await.unwrap();
        store.delete("users", "u1").await.unwrap();
        assert!(matches!(
            store.get("users", "u1").await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            store.delete("users", "u1").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn empty_collection_removed_from_index_after_last_delete() {
        let store = store();
        let payload = json!({}).as_object().unwrap().clone();
        store.put("users", "u1", payload).await.unwrap();
        store.delete("users", "u1").await.unwrap();

        let result = store
            .query("users", &[], &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(result.total, 0);
    }

    #[tokio::test]
    async fn reserved_field_write_is_rejected() {
        let store = store();
        let mut payload = Map::new();
        payload.insert("_version".to_string(), json!(5));
        assert!(matches!(
            store.put("users", "u1", payload).await,
            Err(Error::InvalidDocument(_))
        ));
    }

    #[tokio::test]
    async fn prepare_commit_happy_path() {
        let store = store();
        let tx = TxId::new();
        let mut data = Map::new();
        data.insert("name".to_string(), json!("Alice"));
        let ops = vec![Operation::write("users", "u1", data)];

        let vote = store.prepare(tx, &ops, now_ms() + 10_000).await.unwrap();
        assert_eq!(vote, PrepareVote::Ok);
        store.commit(tx).await.unwrap();

        let doc = store.get("users", "u1").await.unwrap();
        assert_eq!(doc.version, 1);
    }

    #[tokio::test]
    async fn commit_is_idempotent() {
        let store = store();
        let tx = TxId::new();
        let mut data = Map::new();
        data.insert("name".to_string(), json!("Alice"));
        let ops = vec![Operation::write("users", "u1", data)];
        store.prepare(tx, &ops, now_ms() + 10_000).await.unwrap();
        store.commit(tx).await.unwrap();
        let first = store.get("users", "u1").await.unwrap();

        // Replaying commit must not reapply the write (version unchanged).
        store.commit(tx).await.unwrap();
        let second = store.get("users", "u1").await.unwrap();
        assert_eq!(first.version, second.version);
    }

    #[tokio::test]
    async fn abort_discards_staged_write() {
        let store = store();
        let tx = TxId::new();
        let mut data = Map::new();
        data.insert("name".to_string(), json!("Alice"));
        let ops = vec![Operation::write("users", "u1", data)];
        store.prepare(tx, &ops, now_ms() + 10_000).await.unwrap();
        store.abort(tx).await.unwrap();

        assert!(matches!(
            store.get("users", "u1").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn conflicting_lock_votes_abort() {
        let store = store();
        let tx1 = TxId::new();
        let tx2 = TxId::new();
        let mut data = Map::new();
        data.insert("name".to_string(), json!("Alice"));
        let ops = vec![Operation::write("users", "u1", data)];

        let vote1 = store.prepare(tx1, &ops, now_ms() + 10_000).await.unwrap();
        assert_eq!(vote1, PrepareVote::Ok);

        let vote2 = store.prepare(tx2, &ops, now_ms() + 10_000).await.unwrap();
        assert_eq!(vote2, PrepareVote::Abort);
    }

    #[tokio::test]
    async fn expired_lock_auto_releases() {
        let store = store();
        let tx1 = TxId::new();
        let tx2 = TxId::new();
        let mut data = Map::new();
        data.insert("name".to_string(), json!("Alice"));
        let ops = vec![Operation::write("users", "u1", data)];

        store.prepare(tx1, &ops, now_ms() - 1).await.unwrap();
        let vote2 = store.prepare(tx2, &ops, now_ms() + 10_000).await.unwrap();
        assert_eq!(vote2, PrepareVote::Ok);
    }
}

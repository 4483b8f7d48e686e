//! Transaction lifecycle handlers (`/transactions/*`), wiring
//! `shardb_txn::TransactionCoordinator`.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use shardb_core::{Operation, ShardId, TxId};
use shardb_txn::TransactionState;

#[derive(Debug, Deserialize)]
pub struct BeginRequest {
    pub operations: Vec<Operation>,
    #[serde(rename = "timeoutMs")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    #[serde(rename = "transactionId")]
    pub transaction_id: TxId,
    pub status: shardb_txn::TxStatus,
    pub participants: Vec<ShardId>,
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
}

impl From<TransactionState> for TransactionResponse {
    fn from(state: TransactionState) -> Self {
        Self {
            transaction_id: state.tx_id,
            status: state.status,
            participants: state.participants,
            expires_at: state.expires_at,
        }
    }
}

pub async fn begin(
    State(state): State<AppState>,
    Json(req): Json<BeginRequest>,
) -> Result<Json<TransactionResponse>, ApiError> {
    if req.operations.is_empty() {
        return Err(ApiError::bad_request("transaction must contain at least one operation"));
    }
    let timeout_ms = req.timeout_ms.unwrap_or(state.config.transaction_timeout_ms);
    let tx = state.coordinator.begin(req.operations, timeout_ms).await?;
    Ok(Json(tx.into()))
}

pub async fn prepare(
    State(state): State<AppState>,
    Path(tx_id): Path<TxId>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let tx = state.coordinator.prepare(tx_id).await?;
    Ok(Json(tx.into()))
}

pub async fn commit(
    State(state): State<AppState>,
    Path(tx_id): Path<TxId>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let tx = state.coordinator.commit(tx_id).await?;
    Ok(Json(tx.into()))
}

pub async fn abort(
    State(state): State<AppState>,
    Path(tx_id): Path<TxId>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let tx = state.coordinator.abort(tx_id).await?;
    Ok(Json(tx.into()))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(tx_id): Path<TxId>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let tx = state
        .coordinator
        .get(tx_id)
        .await
        .ok_or_else(|| shardb_core::Error::not_found("transaction", tx_id.to_string()))?;
    Ok(Json(tx.into()))
}

#[derive(Debug, Deserialize)]
pub struct ParticipantCallback {
    #[serde(rename = "shardId")]
    pub shard_id: ShardId,
}

pub async fn prepared(
    State(state): State<AppState>,
    Path(tx_id): Path<TxId>,
    Json(body): Json<ParticipantCallback>,
) -> Result<(), ApiError> {
    state.coordinator.on_participant_prepared(tx_id, body.shard_id).await?;
    Ok(())
}

pub async fn committed(
    State(state): State<AppState>,
    Path(tx_id): Path<TxId>,
    Json(body): Json<ParticipantCallback>,
) -> Result<(), ApiError> {
    state.coordinator.on_participant_committed(tx_id, body.shard_id).await?;
    Ok(())
}

pub async fn aborted(
    State(state): State<AppState>,
    Path(tx_id): Path<TxId>,
    Json(body): Json<ParticipantCallback>,
) -> Result<(), ApiError> {
    state.coordinator.on_participant_aborted(tx_id, body.shard_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use shardb_core::{OpType, ShardbConfig};

    fn write_op(collection: &str, id: &str) -> Operation {
        let mut data = Map::new();
        data.insert("name".to_string(), json!("Alice"));
        Operation::write(collection, id, data)
    }

    #[tokio::test]
    async fn begin_prepare_commit_reaches_committed() {
        let state = AppState::bootstrap(ShardbConfig::default(), 3);
        let req = BeginRequest {
            operations: vec![write_op("users", "u1"), write_op("orders", "o1")],
            timeout_ms: None,
        };
        let Json(begun) = begin(State(state.clone()), Json(req)).await.unwrap();
        assert_eq!(begun.status, shardb_txn::TxStatus::Pending);

        let Json(prepared) = prepare(State(state.clone()), Path(begun.transaction_id)).await.unwrap();
        assert_eq!(prepared.status, shardb_txn::TxStatus::Prepared);

        let Json(committed) = commit(State(state), Path(begun.transaction_id)).await.unwrap();
        assert_eq!(committed.status, shardb_txn::TxStatus::Committed);
    }

    #[tokio::test]
    async fn begin_rejects_empty_operation_list() {
        let state = AppState::bootstrap(ShardbConfig::default(), 1);
        let req = BeginRequest {
            operations: vec![],
            timeout_ms: None,
        };
        assert!(begin(State(state), Json(req)).await.is_err());
    }

    #[tokio::test]
    async fn op_type_round_trips_through_json() {
        let op = Operation::read("users", "u1");
        assert_eq!(op.op_type, OpType::Read);
    }
}

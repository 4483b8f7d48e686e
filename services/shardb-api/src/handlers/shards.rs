//! Shard manager endpoints (`/shards/*`, `/nodes/*`, `/lookup/{coll}/{id}`),
//! wiring `shardb_manager::ShardManager`.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use shardb_core::{NodeId, ShardId};
use shardb_manager::{MigrationTask, NodeRecord, NodeStatus, ShardRecord, ShardStatus};

pub async fn list_shards(State(state): State<AppState>) -> Json<Vec<ShardRecord>> {
    Json(state.manager.list_shards())
}

pub async fn get_shard(
    State(state): State<AppState>,
    Path(id): Path<ShardId>,
) -> Result<Json<ShardRecord>, ApiError> {
    Ok(Json(state.manager.get_shard(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct CreateShardRequest {
    #[serde(rename = "primaryNodeId")]
    pub primary_node_id: Option<NodeId>,
}

pub async fn create_shard(
    State(state): State<AppState>,
    Json(req): Json<CreateShardRequest>,
) -> Result<Json<ShardRecord>, ApiError> {
    Ok(Json(state.manager.create_shard(req.primary_node_id)?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateShardRequest {
    pub status: ShardStatus,
    #[serde(rename = "primaryNodeId")]
    pub primary_node_id: Option<NodeId>,
}

pub async fn update_shard(
    State(state): State<AppState>,
    Path(id): Path<ShardId>,
    Json(req): Json<UpdateShardRequest>,
) -> Result<Json<ShardRecord>, ApiError> {
    Ok(Json(state.manager.update_shard(&id, req.status, req.primary_node_id)?))
}

pub async fn list_nodes(State(state): State<AppState>) -> Json<Vec<NodeRecord>> {
    Json(state.manager.list_nodes())
}

pub async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
) -> Result<Json<NodeRecord>, ApiError> {
    Ok(Json(state.manager.get_node(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct RegisterNodeRequest {
    pub url: String,
    pub region: String,
    pub capacity: u32,
}

#[derive(Debug, serde::Serialize)]
pub struct RegisterNodeResponse {
    pub node: NodeRecord,
    pub migrations: Vec<MigrationTask>,
}

pub async fn register_node(
    State(state): State<AppState>,
    Json(req): Json<RegisterNodeRequest>,
) -> Json<RegisterNodeResponse> {
    let (node, migrations) = state.manager.register_node(req.url, req.region, req.capacity);
    Json(RegisterNodeResponse { node, migrations })
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub status: Option<NodeStatus>,
    pub metrics: Option<(f64, f64, f64)>,
}

#[derive(Debug, serde::Serialize)]
pub struct HeartbeatResponse {
    pub node: NodeRecord,
    pub migrations: Vec<MigrationTask>,
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let (node, migrations) = state.manager.heartbeat(&id, req.status, req.metrics)?;
    Ok(Json(HeartbeatResponse { node, migrations }))
}

pub async fn lookup_shard(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<ShardId>, ApiError> {
    Ok(Json(state.manager.lookup_shard(&collection, &id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardb_core::ShardbConfig;

    #[tokio::test]
    async fn list_shards_reflects_bootstrap() {
        let state = AppState::bootstrap(ShardbConfig::default(), 3);
        let Json(shards) = list_shards(State(state)).await;
        assert_eq!(shards.len(), 3);
    }

    #[tokio::test]
    async fn lookup_shard_is_deterministic() {
        let state = AppState::bootstrap(ShardbConfig::default(), 3);
        let Json(first) = lookup_shard(State(state.clone()), Path(("users".to_string(), "u1".to_string())))
            .await
            .unwrap();
        let Json(second) = lookup_shard(State(state), Path(("users".to_string(), "u1".to_string())))
            .await
            .unwrap();
        assert_eq!(first, second);
    }
}

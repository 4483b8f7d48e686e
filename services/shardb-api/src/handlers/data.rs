//! Single-document CRUD and cross-shard query handlers
//! (`/api/data/{collection}[/{id}]`).

use crate::client::ClientIdHeader;
use crate::error::ApiError;
use crate::fetcher::InProcessFetcher;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shardb_core::{CompareOp, Error};
use shardb_query::{aggregate, merge, parse, plan, AggregationResult};
use shardb_routing::IdFilterHint;
use std::sync::Arc;

fn shard_store(
    state: &AppState,
    shard_id: &shardb_core::ShardId,
) -> Result<Arc<shardb_store::ShardStore>, ApiError> {
    state
        .shards
        .get(shard_id)
        .cloned()
        .ok_or_else(|| Error::not_found("shard", shard_id.to_string()).into())
}

pub async fn get_document(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    ClientIdHeader(client_id): ClientIdHeader,
) -> Result<Json<Value>, ApiError> {
    let shard_id = state.router.route_request(&collection, &id, client_id.as_deref())?;
    let store = shard_store(&state, &shard_id)?;
    let doc = store.get(&collection, &id).await?;
    Ok(Json(doc.to_json()))
}

pub async fn put_document(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    ClientIdHeader(client_id): ClientIdHeader,
    Json(payload): Json<Map<String, Value>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let shard_id = state.router.route_request(&collection, &id, client_id.as_deref())?;
    let store = shard_store(&state, &shard_id)?;
    let (doc, created) = store.put(&collection, &id, payload).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(doc.to_json())))
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    deleted: bool,
    id: String,
    collection: String,
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    ClientIdHeader(client_id): ClientIdHeader,
) -> Result<Json<DeleteResponse>, ApiError> {
    let shard_id = state.router.route_request(&collection, &id, client_id.as_deref())?;
    let store = shard_store(&state, &shard_id)?;
    store.delete(&collection, &id).await?;
    Ok(Json(DeleteResponse {
        deleted: true,
        id,
        collection,
    }))
}

/// The `POST /api/data/{collection}` body: a `shardb_query::RawQueryRequest`
/// plus the executor-level `continueOnError` policy, which lives outside
/// `QueryOptions` because it governs cross-shard fan-out, not per-shard
/// filtering/sorting.
#[derive(Debug, Deserialize)]
struct QueryRequestBody {
    #[serde(default)]
    filters: Vec<shardb_store::FilterCondition>,
    projection: Option<Vec<String>>,
    #[serde(default)]
    options: shardb_store::QueryOptions,
    #[serde(default)]
    aggregations: Vec<shardb_query::AggregationSpec>,
    #[serde(default = "default_true", rename = "continueOnError")]
    continue_on_error: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct QueryMetadata {
    total: usize,
    limit: Option<usize>,
    offset: usize,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    results: Vec<Value>,
    metadata: QueryMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    aggregations: Option<Vec<AggregationResult>>,
}

fn id_hint(filters: &[shardb_store::FilterCondition]) -> Option<IdFilterHint> {
    filters.iter().find_map(|f| {
        if f.field != "_id" {
            return None;
        }
        match (f.op, &f.value) {
            (CompareOp::Eq, Value::String(s)) => Some(IdFilterHint::equality(s.clone())),
            _ => None,
        }
    })
}

pub async fn query_collection(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(body): Json<QueryRequestBody>,
) -> Result<Json<QueryResponse>, ApiError> {
    let raw = shardb_query::RawQueryRequest {
        filters: body.filters,
        projection: body.projection,
        options: body.options,
        aggregations: body.aggregations,
    };
    let parsed = parse(&collection, raw)?;

    let hint = id_hint(&parsed.filters);
    let shards = state.router.shards_for_query(&collection, hint.as_ref());
    let query_plan = plan(&parsed, &shards, state.config.max_plan_cost)?;

    let fetcher = Arc::new(InProcessFetcher::new(state.shards.clone(), collection.clone()));
    let shard_results =
        shardb_query::execute(&query_plan, fetcher, state.config.as_ref(), body.continue_on_error).await?;

    let aggregations = if parsed.aggregations.is_empty() {
        None
    } else {
        let all_docs: Vec<_> = shard_results.iter().flat_map(|r| r.results.clone()).collect();
        Some(aggregate(&all_docs, &parsed.aggregations))
    };

    let merged = merge(shard_results, &parsed.options, parsed.projection.as_deref());

    Ok(Json(QueryResponse {
        results: merged.results,
        metadata: QueryMetadata {
            total: merged.total,
            limit: merged.limit,
            offset: merged.offset,
        },
        aggregations,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardb_core::ShardbConfig;

    #[tokio::test]
    async fn put_then_get_round_trips_via_http_handlers() {
        let state = AppState::bootstrap(ShardbConfig::default(), 2);
        let mut payload = Map::new();
        payload.insert("name".to_string(), Value::String("Alice".to_string()));

        let (status, Json(doc)) = put_document(
            State(state.clone()),
            Path(("users".to_string(), "u1".to_string())),
            ClientIdHeader(None),
            Json(payload),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(doc["_version"], 1);

        let Json(fetched) = get_document(
            State(state),
            Path(("users".to_string(), "u1".to_string())),
            ClientIdHeader(None),
        )
        .await
        .unwrap();
        assert_eq!(fetched["name"], "Alice");
    }

    #[tokio::test]
    async fn get_missing_document_surfaces_not_found() {
        let state = AppState::bootstrap(ShardbConfig::default(), 2);
        let err = get_document(
            State(state),
            Path(("users".to_string(), "missing".to_string())),
            ClientIdHeader(None),
        )
        .await
        .unwrap_err();
        assert_eq!(format!("{err:?}"), format!("{:?}", ApiError::from(Error::not_found("document", "users/missing"))));
    }

    #[tokio::test]
    async fn query_with_filter_and_sort_matches_expected_order() {
        let state = AppState::bootstrap(ShardbConfig::default(), 2);
        for (id, age) in [("1", 25), ("2", 30)] {
            let mut payload = Map::new();
            payload.insert("age".to_string(), Value::from(age));
            put_document(
                State(state.clone()),
                Path(("people".to_string(), id.to_string())),
                ClientIdHeader(None),
                Json(payload),
            )
            .await
            .unwrap();
        }

        let body = QueryRequestBody {
            filters: vec![shardb_store::FilterCondition {
                field: "age".to_string(),
                op: CompareOp::Gt,
                value: Value::from(21),
            }],
            projection: None,
            options: shardb_store::QueryOptions {
                sort: vec![shardb_store::SortKey {
                    field: "age".to_string(),
                    ascending: false,
                }],
                limit: Some(10),
                offset: 0,
            },
            aggregations: vec![],
            continue_on_error: true,
        };

        let Json(response) = query_collection(State(state), Path("people".to_string()), Json(body))
            .await
            .unwrap();
        assert_eq!(response.metadata.total, 2);
        assert_eq!(response.results[0]["age"], 30);
        assert_eq!(response.results[1]["age"], 25);
    }
}

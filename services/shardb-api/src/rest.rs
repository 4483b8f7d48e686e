//! Builds the Axum router, grounded on
//! `akidb-api::rest::build_router`'s public/protected split and its
//! `TraceLayer` request-span setup.

use crate::handlers::{
    abort, aborted, begin, commit, committed, create_shard, delete_document, get_document,
    get_node, get_shard, get_transaction, health, heartbeat, list_nodes, list_shards,
    lookup_shard, prepare, prepared, put_document, query_collection, register_node, update_shard,
};
use crate::state::AppState;
use axum::{
    extract::Request,
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{info_span, Span};
use uuid::Uuid;

pub fn build_router(state: AppState) -> Router {
    let data_routes = Router::new()
        .route(
            "/api/data/:collection/:id",
            get(get_document).put(put_document).delete(delete_document),
        )
        .route("/api/data/:collection", post(query_collection));

    let transaction_routes = Router::new()
        .route("/transactions", post(begin))
        .route("/transactions/:id", get(get_transaction))
        .route("/transactions/:id/prepare", post(prepare))
        .route("/transactions/:id/commit", post(commit))
        .route("/transactions/:id/abort", post(abort))
        .route("/transactions/:id/prepared", post(prepared))
        .route("/transactions/:id/committed", post(committed))
        .route("/transactions/:id/aborted", post(aborted));

    let manager_routes = Router::new()
        .route("/shards", get(list_shards).post(create_shard))
        .route("/shards/:id", put(update_shard).get(get_shard))
        .route("/nodes", get(list_nodes).post(register_node))
        .route("/nodes/:id", get(get_node))
        .route("/nodes/:id/heartbeat", post(heartbeat))
        .route("/lookup/:collection/:id", get(lookup_shard));

    Router::new()
        .route("/health", get(health))
        .merge(data_routes)
        .merge(transaction_routes)
        .merge(manager_routes)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request| {
                let request_id = Uuid::new_v4();
                info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }).on_response(|response: &axum::response::Response, latency: std::time::Duration, _span: &Span| {
                let status = response.status();
                if status.is_server_error() {
                    tracing::error!(%status, latency_ms = latency.as_millis(), "request failed");
                } else if status.is_client_error() {
                    tracing::warn!(%status, latency_ms = latency.as_millis(), "request rejected");
                } else {
                    tracing::info!(%status, latency_ms = latency.as_millis(), "request completed");
                }
            }),
        )
}

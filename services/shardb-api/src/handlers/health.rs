//! `GET /health`.

use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub environment: String,
    pub features: Vec<&'static str>,
}

pub async fn health(State(_state): State<AppState>) -> Json<HealthResponse> {
    let environment = std::env::var("SHARDB_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment,
        features: vec!["routing", "query", "transactions", "shard-manager"],
    })
}

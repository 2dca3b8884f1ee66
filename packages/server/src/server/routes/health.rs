use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    active_runs: usize,
    tracked_jobs: usize,
    units: usize,
}

#[derive(Serialize)]
pub struct RootResponse {
    message: String,
    endpoints: Vec<&'static str>,
}

/// Health check endpoint
///
/// The supervisor holds no external connections, so it is healthy whenever
/// it can answer.
pub async fn health_handler(Extension(state): Extension<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let supervisor = &state.supervisor;
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            active_runs: supervisor.active_runs(),
            tracked_jobs: supervisor.registry().len(),
            units: supervisor.catalog().len(),
        }),
    )
}

pub async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Harvest job supervisor".to_string(),
        endpoints: vec![
            "GET /health",
            "GET /units",
            "GET /jobs",
            "POST /jobs/:unit",
            "GET /jobs/:id",
            "GET /jobs/:id/logs?offset=&limit=",
            "POST /jobs/:id/cancel",
            "DELETE /jobs/:id",
        ],
    })
}

//! Job endpoints.
//!
//! POST   /jobs/:unit         start a worker for a unit
//! GET    /jobs               list tracked jobs
//! GET    /jobs/:id           one job
//! GET    /jobs/:id/logs      poll the job log from an offset
//! POST   /jobs/:id/cancel    SIGTERM the worker
//! DELETE /jobs/:id           evict a finished job

use std::collections::HashMap;
use std::path::PathBuf;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::kernel::jobs::{Job, LogChunk, RegistryError, DEFAULT_READ_LIMIT};
use crate::server::app::AppState;
use crate::server::error::ApiError;

const SAME_UNIT_NOTE: &str =
    "Jobs for the same unit share output files; avoid starting a unit that is already running.";

#[derive(Debug, Default, Deserialize)]
pub struct StartJobRequest {
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl StartJobRequest {
    /// An empty body starts the unit with no extra env; anything else must
    /// be a valid request object.
    pub fn from_body(body: &[u8]) -> Result<Self, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("invalid start request: {e}")))
    }
}

#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub id: String,
    pub unit: String,
    pub log_path: PathBuf,
    pub pid: Option<u32>,
    pub note: &'static str,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub active_runs: usize,
    pub jobs: Vec<Job>,
}

#[derive(Debug, Serialize)]
pub struct UnitListResponse {
    pub units: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub id: String,
    pub cancelled: bool,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub offset: u64,
    pub limit: Option<usize>,
}

pub async fn list_units_handler(Extension(state): Extension<AppState>) -> Json<UnitListResponse> {
    Json(UnitListResponse {
        units: state.supervisor.catalog().names(),
    })
}

pub async fn start_job_handler(
    Extension(state): Extension<AppState>,
    Path(unit): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<StartJobResponse>), ApiError> {
    let request = StartJobRequest::from_body(&body)?;
    let handle = state.supervisor.start(&unit, request.env).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartJobResponse {
            id: handle.id,
            unit: handle.unit,
            log_path: handle.log_path,
            pid: handle.pid,
            note: SAME_UNIT_NOTE,
        }),
    ))
}

pub async fn list_jobs_handler(Extension(state): Extension<AppState>) -> Json<JobListResponse> {
    Json(JobListResponse {
        active_runs: state.supervisor.active_runs(),
        jobs: state.supervisor.list(),
    })
}

pub async fn get_job_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    state
        .supervisor
        .status(&id)
        .map(Json)
        .ok_or_else(|| RegistryError::NotFound(id).into())
}

pub async fn job_logs_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Json<LogChunk>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_READ_LIMIT);
    let chunk = state.supervisor.read_log(&id, query.offset, limit).await?;
    Ok(Json(chunk))
}

pub async fn cancel_job_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let cancelled = state.supervisor.cancel(&id).await?;
    Ok(Json(CancelResponse { id, cancelled }))
}

pub async fn remove_job_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job = state.supervisor.remove(&id)?;
    Ok(Json(job))
}

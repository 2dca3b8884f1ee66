//! Mapping of supervisor errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::kernel::jobs::{RegistryError, SupervisorError};

#[derive(Debug)]
pub enum ApiError {
    Supervisor(SupervisorError),
    /// The request body could not be read as the expected JSON.
    BadRequest(String),
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        Self::Supervisor(err)
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self::Supervisor(err.into())
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        let err = match self {
            Self::Supervisor(err) => err,
            Self::BadRequest(_) => return StatusCode::BAD_REQUEST,
        };
        match err {
            SupervisorError::UnknownUnit { .. } => StatusCode::NOT_FOUND,
            SupervisorError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
            SupervisorError::Registry(RegistryError::StillRunning(_)) => StatusCode::CONFLICT,
            SupervisorError::Registry(RegistryError::DuplicateIdentifier(_)) => StatusCode::CONFLICT,
            SupervisorError::LogSink { .. } | SupervisorError::ProcessSpawn { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::Supervisor(err) => {
                if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                }
                match err {
                    SupervisorError::ProcessSpawn { job_id, .. } => json!({
                        "error": err.to_string(),
                        "id": job_id,
                    }),
                    _ => json!({ "error": err.to_string() }),
                }
            }
            Self::BadRequest(message) => json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}

//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::jobs::Supervisor;
use crate::server::routes::{
    cancel_job_handler, get_job_handler, health_handler, job_logs_handler, list_jobs_handler,
    list_units_handler, remove_job_handler, root_handler, start_job_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
}

/// Build the Axum application router
pub fn build_app(supervisor: Arc<Supervisor>) -> Router {
    let app_state = AppState { supervisor };

    // CORS configuration - allow any origin for development
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/units", get(list_units_handler))
        .route("/jobs", get(list_jobs_handler))
        // POST takes a unit name, GET and DELETE take a job id
        .route(
            "/jobs/:id",
            get(get_job_handler)
                .post(start_job_handler)
                .delete(remove_job_handler),
        )
        .route("/jobs/:id/logs", get(job_logs_handler))
        .route("/jobs/:id/cancel", post(cancel_job_handler))
        .layer(Extension(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::types::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub engine: String,
    pub tables: bool,
    pub pdf: bool,
    pub max_jobs: usize,
    pub available_jobs: usize,
    pub uptime_secs: u64,
}

/// `GET /health`: liveness plus capacity.
pub async fn check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: crate::config::APP_VERSION,
        engine: state.pipeline.engine_name().to_string(),
        tables: state.pipeline.tables_enabled(),
        pdf: state.pipeline.pdf_enabled(),
        max_jobs: state.max_jobs,
        available_jobs: state.jobs.available_permits(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

//! Health check endpoint

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub providers: usize,
    pub schedulers: usize,
}

/// Always OK while the server is running
async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        providers: state.app.aggregator().providers().len(),
        schedulers: state.app.scheduler_status().len(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

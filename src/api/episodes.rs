//! Episode search, snatch and completion endpoints

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Deserialize;
use uuid::Uuid;

use super::{ActionResponse, ApiError, ApiResult, AppState};
use crate::error::ControlError;
use crate::jobs::ManualSearchResults;

#[derive(Debug, Deserialize)]
pub struct ManualSnatchRequest {
    pub guid: String,
}

async fn force_search(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<ActionResponse> {
    let job_id = state.app.force_search(id).await?;
    Ok(Json(ActionResponse::queued(job_id)))
}

async fn manual_search(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<ActionResponse> {
    let job_id = state.app.manual_search(id).await?;
    Ok(Json(ActionResponse::queued(job_id)))
}

async fn manual_results(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<ManualSearchResults> {
    state
        .app
        .manual_results(id)
        .map(Json)
        .ok_or_else(|| ApiError(ControlError::NotFound(format!("manual results for episode {}", id))))
}

async fn manual_snatch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ManualSnatchRequest>,
) -> ApiResult<ActionResponse> {
    let job_id = state.app.manual_snatch(id, &body.guid)?;
    Ok(Json(ActionResponse::queued(job_id)))
}

async fn downloaded(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<ActionResponse> {
    state.app.complete_download(id).await?;
    Ok(Json(ActionResponse::ok()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/episodes/{id}/search", post(force_search))
        .route("/episodes/{id}/manual-search", post(manual_search))
        .route("/episodes/{id}/results", get(manual_results))
        .route("/episodes/{id}/snatch", post(manual_snatch))
        .route("/episodes/{id}/downloaded", post(downloaded))
}

//! Scheduler endpoints

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use super::{ActionResponse, ApiResult, AppState};
use crate::services::scheduler::SchedulerStatus;

async fn list(State(state): State<AppState>) -> Json<Vec<SchedulerStatus>> {
    Json(state.app.scheduler_status())
}

async fn force_run(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<ActionResponse> {
    state.app.force_scheduler(&name)?;
    Ok(Json(ActionResponse::ok()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/schedulers", get(list))
        .route("/schedulers/{name}/run", post(force_run))
}

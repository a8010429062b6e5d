//! Queue and show-queue endpoints

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Serialize;
use uuid::Uuid;

use super::{ActionResponse, ApiError, ApiResult, AppState};
use crate::error::ControlError;
use crate::services::job_queue::QueueItemView;
use crate::services::queues::{QueueName, ShowAction};

#[derive(Debug, Serialize)]
pub struct QueueState {
    pub name: &'static str,
    pub paused: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    pub queues: Vec<QueueState>,
    pub items: Vec<QueueItemView>,
}

fn parse_queue(name: &str) -> Result<QueueName, ApiError> {
    name.parse()
        .map_err(|_| ApiError(ControlError::NotFound(format!("queue {}", name))))
}

async fn queue_status(State(state): State<AppState>) -> Json<QueueStatusResponse> {
    let queues = QueueName::ALL
        .iter()
        .map(|q| QueueState {
            name: q.as_str(),
            paused: state.app.is_queue_paused(*q),
        })
        .collect();

    Json(QueueStatusResponse {
        queues,
        items: state.app.queue_status(),
    })
}

async fn pause_queue(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<ActionResponse> {
    state.app.pause_queue(parse_queue(&name)?);
    Ok(Json(ActionResponse::ok()))
}

async fn resume_queue(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<ActionResponse> {
    state.app.resume_queue(parse_queue(&name)?);
    Ok(Json(ActionResponse::ok()))
}

async fn abort_item(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, Uuid)>,
) -> ApiResult<ActionResponse> {
    if state.app.abort_queue_item(parse_queue(&name)?, id) {
        Ok(Json(ActionResponse::ok()))
    } else {
        Err(ApiError(ControlError::NotFound(format!("queued item {}", id))))
    }
}

async fn show_action(
    State(state): State<AppState>,
    Path((show_id, action)): Path<(Uuid, String)>,
) -> ApiResult<ActionResponse> {
    let action: ShowAction = action
        .parse()
        .map_err(|_| ApiError(ControlError::NotFound(format!("show action {}", action))))?;
    let id = state.app.queue_show_action(show_id, action).await?;
    Ok(Json(ActionResponse::queued(id)))
}

#[derive(Debug, Serialize)]
pub struct ShowQueueMembership {
    pub show_id: Uuid,
    pub in_queue: bool,
}

async fn show_in_queue(State(state): State<AppState>, Path(show_id): Path<Uuid>) -> Json<ShowQueueMembership> {
    Json(ShowQueueMembership {
        show_id,
        in_queue: state.app.is_in_show_queue(show_id),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queues", get(queue_status))
        .route("/queues/{name}/pause", post(pause_queue))
        .route("/queues/{name}/resume", post(resume_queue))
        .route("/queues/{name}/items/{id}/abort", post(abort_item))
        .route("/shows/{id}/queue", get(show_in_queue))
        .route("/shows/{id}/actions/{action}", post(show_action))
}

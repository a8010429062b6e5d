//! REST control surface
//!
//! Thin axum handlers over [`App`]. Every handler returns JSON; control
//! errors are mapped to status codes by [`ApiError`].

pub mod episodes;
pub mod health;
pub mod queues;
pub mod schedulers;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::app::App;
use crate::error::ControlError;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub app: Arc<App>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<uuid::Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            id: None,
            error: None,
        }
    }

    pub fn queued(id: uuid::Uuid) -> Self {
        Self {
            success: true,
            id: Some(id),
            error: None,
        }
    }
}

/// Control error as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub ControlError);

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ControlError::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            ControlError::InvalidState(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            ControlError::Conflict(e) => (StatusCode::CONFLICT, e.user_message().to_string()),
            ControlError::Store(e) => {
                error!(error = %e, "Control action failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        let body = ActionResponse {
            success: false,
            id: None,
            error: Some(message),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the full router with CORS and request tracing
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .merge(health::router())
        .merge(queues::router())
        .merge(episodes::router())
        .merge(schedulers::router());

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

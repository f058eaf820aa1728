//! REST endpoints for scheduling actions and triggering mailbox polls.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::channels::MailboxWatcher;
use crate::error::SchedulerError;
use crate::scheduler::{ActionScheduler, Cadence, StopOutcome};

/// Shared state for the control routes.
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<ActionScheduler>,
    pub watcher: Arc<MailboxWatcher>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub action: String,
    /// `"hourly"` or `"daily"`.
    pub schedule: String,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub user_id: String,
}

fn error(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// POST /api/schedule
///
/// 200 with a confirmation message, 400 for an unknown cadence, 404 when
/// the user does not exist.
async fn schedule_action(
    State(state): State<ApiState>,
    Json(req): Json<ScheduleRequest>,
) -> Response {
    let cadence = match req.schedule.parse::<Cadence>() {
        Ok(cadence) => cadence,
        Err(e) => return error(StatusCode::BAD_REQUEST, e),
    };

    match state
        .scheduler
        .schedule(&req.action, cadence, &req.user_id)
        .await
    {
        Ok(message) => Json(json!({ "message": message })).into_response(),
        Err(e @ SchedulerError::UserNotFound { .. }) => error(StatusCode::NOT_FOUND, e),
        Err(e) => {
            tracing::error!(user_id = %req.user_id, error = %e, "Failed to schedule action");
            error(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// POST /api/schedule/stop
async fn stop_action(State(state): State<ApiState>, Json(req): Json<StopRequest>) -> Response {
    let outcome = state.scheduler.stop(&req.user_id).await;
    Json(json!({
        "message": outcome.to_string(),
        "stopped": outcome == StopOutcome::Stopped,
    }))
    .into_response()
}

/// GET /api/schedule
async fn list_jobs(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.scheduler.jobs().await)
}

/// POST /api/mail/poll
///
/// Runs one mailbox poll and returns its report once every fetched
/// message has been handled.
async fn poll_mailbox(State(state): State<ApiState>) -> Response {
    match state.watcher.poll_once().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error(StatusCode::BAD_GATEWAY, e),
    }
}

/// Build the control routes.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/schedule", get(list_jobs).post(schedule_action))
        .route("/api/schedule/stop", post(stop_action))
        .route("/api/mail/poll", post(poll_mailbox))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

//! REST endpoints for routing messages and inspecting progress.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::error::{DatabaseError, RouteError};
use crate::orchestrator::{Orchestrator, RouteRequest};
use crate::progress::ProgressRecord;

/// Shared state for the router's HTTP surface.
#[derive(Clone)]
pub struct RouteState {
    pub orchestrator: Arc<Orchestrator>,
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            RouteError::AccessDenied { reason } => (
                StatusCode::FORBIDDEN,
                json!({ "error": self.to_string(), "denial_reason": reason }),
            ),
            RouteError::NotFound { user_id } => (
                StatusCode::NOT_FOUND,
                json!({ "error": self.to_string(), "user_id": user_id }),
            ),
            RouteError::GenerationFailed { message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "reply_text": message, "retryable": true }),
            ),
            RouteError::Store(DatabaseError::Conflict { .. }) => (
                StatusCode::CONFLICT,
                json!({ "error": self.to_string(), "retryable": true }),
            ),
            RouteError::Invariant(_) | RouteError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "internal error" }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// Progress snapshot returned by the REST endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProgressStatus {
    pub user_id: String,
    pub current_phase: u32,
    pub phase_count: u32,
    pub is_complete: bool,
    pub current_agent: crate::routing::AgentKind,
    pub phase_data: std::collections::BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ProgressStatus {
    fn new(record: ProgressRecord, phase_count: u32) -> Self {
        Self {
            user_id: record.user_id,
            current_phase: record.current_phase,
            phase_count,
            is_complete: record.is_complete,
            current_agent: record.current_agent,
            phase_data: record.phase_data,
            completed_at: record.completed_at,
        }
    }
}

/// POST /api/route
///
/// Routes one message. 200 with the reply, 403 with a denial reason, 404
/// for unknown users, 503 with a retry message when generation fails.
async fn route_message(
    State(state): State<RouteState>,
    Json(request): Json<RouteRequest>,
) -> Result<impl IntoResponse, RouteError> {
    let response = state.orchestrator.handle(request).await?;
    Ok(Json(response))
}

/// GET /api/progress/{user_id}
async fn get_progress(
    State(state): State<RouteState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, RouteError> {
    let record = state.orchestrator.status(&user_id).await?;
    let phase_count = state.orchestrator.config().phase_map.phase_count();
    Ok(Json(ProgressStatus::new(record, phase_count)))
}

/// POST /api/progress/{user_id}/start
///
/// Idempotent: returns the existing record if onboarding already started.
async fn start_onboarding(
    State(state): State<RouteState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, RouteError> {
    let record = state.orchestrator.start_onboarding(&user_id).await?;
    let phase_count = state.orchestrator.config().phase_map.phase_count();
    Ok(Json(ProgressStatus::new(record, phase_count)))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Build the REST routes.
pub fn router_routes(state: RouteState) -> Router {
    Router::new()
        .route("/api/route", post(route_message))
        .route("/api/progress/{user_id}", get(get_progress))
        .route("/api/progress/{user_id}/start", post(start_onboarding))
        .route("/health", get(health))
        .with_state(state)
}

//! HTTP route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<SessionHost>`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::engine::session::SessionView;
use crate::host::{RoundResult, SessionHost};
use crate::types::PulseError;

pub type AppState = Arc<SessionHost>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Domain error rendered as `{"error": "..."}` with a matching status code.
#[derive(Debug)]
pub struct ApiError(pub PulseError);

impl From<PulseError> for ApiError {
    fn from(e: PulseError) -> Self {
        Self(e)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PulseError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            PulseError::InvalidPhase { .. } | PulseError::BreakNotOver { .. } => StatusCode::CONFLICT,
            PulseError::MalformedBlockOrder(_) | PulseError::Config(_) => StatusCode::BAD_REQUEST,
            PulseError::RngUnavailable(_) | PulseError::Recorder(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct OutboxResponse {
    pub pending: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryResponse {
    pub delivered: usize,
    pub pending: usize,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST /api/sessions
pub async fn create_session(
    State(host): State<AppState>,
) -> Result<(StatusCode, Json<SessionView>), ApiError> {
    let view = host.start_session().await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/sessions/:id
pub async fn get_session(State(host): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<SessionView> {
    Ok(Json(host.view(id).await?))
}

/// POST /api/sessions/:id/start
pub async fn start(State(host): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<SessionView> {
    Ok(Json(host.begin(id).await?))
}

/// POST /api/sessions/:id/safe
pub async fn choose_safe(State(host): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<RoundResult> {
    Ok(Json(host.choose_safe(id).await?))
}

/// POST /api/sessions/:id/risk
pub async fn choose_risk(State(host): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<RoundResult> {
    Ok(Json(host.choose_risk(id).await?))
}

/// POST /api/sessions/:id/continue
pub async fn continue_round(
    State(host): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SessionView> {
    Ok(Json(host.continue_round(id).await?))
}

/// POST /api/sessions/:id/next-block
pub async fn continue_block(
    State(host): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SessionView> {
    Ok(Json(host.continue_block(id).await?))
}

/// GET /api/outbox
pub async fn get_outbox(State(host): State<AppState>) -> Json<OutboxResponse> {
    Json(OutboxResponse {
        pending: host.outbox_len().await,
    })
}

/// POST /api/outbox/retry
pub async fn retry_outbox(State(host): State<AppState>) -> Json<RetryResponse> {
    let delivered = host.retry_outbox().await;
    Json(RetryResponse {
        delivered,
        pending: host.outbox_len().await,
    })
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

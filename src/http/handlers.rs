use super::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, info};

use crate::conversation::EngineStatus;
use crate::coordinator::Banner;
use crate::handoff::BroadcastStatus;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct BroadcastSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BroadcastStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<i64>,
    pub pending_uploads: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_upload_phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_upload_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub conversation: EngineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<Banner>,
    pub broadcast: BroadcastSnapshot,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /status
/// Full daemon status: conversation state, banner, broadcast pipeline
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let Some(conversation) = state.engine.status().await else {
        error!("Status requested but the engine is not running");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "Conversation engine is not running".to_string(),
            }),
        )
            .into_response();
    };

    let broadcast = BroadcastSnapshot {
        status: state.store.status(),
        started_at: state.store.started_at(),
        stopped_at: state.store.stopped_at(),
        pending_uploads: state.store.pending_uploads().len(),
        last_upload_phase: state.store.last_upload_phase(),
        last_upload_error: state.store.last_upload_error(),
    };
    let banner = *state.banner.borrow();

    (
        StatusCode::OK,
        Json(StatusResponse {
            conversation,
            banner,
            broadcast,
        }),
    )
        .into_response()
}

/// POST /mic/on
/// Enable the microphone, connecting the live session if needed
pub async fn mic_on(State(state): State<AppState>) -> impl IntoResponse {
    info!("Microphone on requested");
    state.engine.mic_on().await;
    accepted("Microphone on")
}

/// POST /mic/off
/// Disable the microphone; the live session stays up
pub async fn mic_off(State(state): State<AppState>) -> impl IntoResponse {
    info!("Microphone off requested");
    state.engine.mic_off().await;
    accepted("Microphone off")
}

/// POST /interrupt
/// Cut off the in-flight response and return to idle
pub async fn interrupt(State(state): State<AppState>) -> impl IntoResponse {
    info!("Interrupt requested");
    state.engine.interrupt().await;
    accepted("Interrupt")
}

/// POST /reset
/// Tear the conversation session down to its default state
pub async fn reset(State(state): State<AppState>) -> impl IntoResponse {
    info!("Reset requested");
    state.engine.reset().await;
    accepted("Reset")
}

fn accepted(what: &str) -> Response {
    (
        StatusCode::OK,
        Json(ActionResponse {
            status: "accepted".to_string(),
            message: format!("{what} requested"),
        }),
    )
        .into_response()
}

//! Recording control endpoints.
//!
//! Mirrors the consent popup, tray and debug panel:
//! - POST /confirm, /decline, /end, /stop, /toggle-pause
//! - GET /status

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tracing::{error, info};

use super::super::error::{ApiError, ApiResult};
use super::super::ApiState;
use crate::meeting::ControllerInput;
use crate::ui::UiCommand;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/confirm", post(confirm))
        .route("/decline", post(decline))
        .route("/end", post(end))
        .route("/stop", post(stop))
        .route("/toggle-pause", post(toggle_pause))
        .route("/status", get(status))
        .with_state(state)
}

async fn confirm(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    forward(&state, UiCommand::ConfirmRecording).await
}

async fn decline(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    forward(&state, UiCommand::DeclineRecording).await
}

async fn end(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    forward(&state, UiCommand::EndRecording).await
}

async fn stop(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    forward(&state, UiCommand::Stop).await
}

async fn toggle_pause(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    forward(&state, UiCommand::TogglePause).await
}

/// Hands the command to the dispatcher. The controller acts on it in order
/// with engine events; the response only acknowledges receipt.
async fn forward(state: &ApiState, command: UiCommand) -> ApiResult<Json<Value>> {
    let snapshot = state.controller.snapshot();
    let needs_session = !matches!(command, UiCommand::TogglePause);
    if needs_session && snapshot.window_id.is_none() {
        return Err(ApiError::conflict("No meeting is currently active"));
    }

    info!("{} command received via API", command.as_str());

    if let Err(e) = state.inputs.send(ControllerInput::Ui(command)).await {
        error!("Failed to queue {} command: {}", command.as_str(), e);
        return Err(ApiError::unavailable("Service is shutting down"));
    }

    Ok(Json(json!({
        "success": true,
        "command": command.as_str(),
        "recording": snapshot.recording.as_str(),
    })))
}

async fn status(State(state): State<ApiState>) -> Json<Value> {
    let snapshot = state.controller.snapshot();
    let signed_in = state.auth.is_signed_in().await;

    Json(json!({
        "recording": snapshot.recording.as_str(),
        "paused": snapshot.recording == crate::meeting::RecordingState::Paused,
        "session_id": snapshot.session_id,
        "window_id": snapshot.window_id,
        "platform": snapshot.platform,
        "meeting_url": snapshot.meeting_url,
        "consent": snapshot.consent.map(|consent| consent.as_str()),
        "registered_url": snapshot.registered_url,
        "session_age_seconds": snapshot.session_age_seconds(),
        "suppressed_windows": snapshot.suppressed_windows,
        "signed_in": signed_in,
        "user": state.auth.identity(),
        "ui": state.hub.snapshot(),
    }))
}

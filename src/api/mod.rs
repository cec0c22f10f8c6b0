//! Local REST API for notetaker.
//!
//! Provides HTTP endpoints for:
//! - Consent and recording control (confirm, decline, end, stop, toggle-pause)
//! - Service and meeting status
//! - Pushed UI events (server-sent events)
//! - Sign-in and sign-out

pub mod error;
pub mod routes;

use crate::auth::AuthManager;
use crate::meeting::{ControllerInput, SessionController};
use crate::ui::UiHub;
use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tracing::info;

/// Shared by every handler.
#[derive(Clone)]
pub struct ApiState {
    pub inputs: mpsc::Sender<ControllerInput>,
    pub controller: SessionController,
    pub hub: UiHub,
    pub auth: Arc<AuthManager>,
}

pub struct ApiServer {
    port: u16,
    state: ApiState,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .merge(routes::control::router(state.clone()))
        .merge(routes::events::router(state.clone()))
        .merge(routes::auth::router(state))
        .layer(ServiceBuilder::new())
}

impl ApiServer {
    pub fn new(state: ApiState, port: u16) -> Self {
        Self { port, state }
    }

    pub async fn start(self) -> Result<()> {
        let app = router(self.state);
        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /              - Service info");
        info!("  GET  /status        - Meeting and recording status");
        info!("  GET  /events        - UI event stream (SSE)");
        info!("  POST /confirm       - Record the detected meeting");
        info!("  POST /decline       - Don't record the detected meeting");
        info!("  POST /end           - End the current recording");
        info!("  POST /stop          - Stop recording (tray)");
        info!("  POST /toggle-pause  - Pause or resume");
        info!("  POST /login         - Sign in through the browser");
        info!("  POST /logout        - Sign out");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "notetaker",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

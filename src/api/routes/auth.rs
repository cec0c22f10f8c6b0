//! Sign-in endpoints: POST /login, POST /logout.

use axum::{extract::State, response::Json, routing::post, Router};
use serde_json::{json, Value};
use tracing::info;

use super::super::error::ApiResult;
use super::super::ApiState;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .with_state(state)
}

/// Resolves once the browser flow finishes or times out.
async fn login(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    info!("Login requested via API");
    state.auth.login().await?;
    Ok(Json(json!({
        "success": true,
        "user": state.auth.identity(),
    })))
}

async fn logout(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    info!("Logout requested via API");
    state.auth.logout().await?;
    Ok(Json(json!({ "success": true })))
}

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use std::sync::Arc;

use crate::update;
use crate::web::{AppError, AppState};

pub fn update_router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(trigger_update_handler))
}

/// Kicks off the self-update process and returns immediately. Progress
/// is followed over the update-log websocket.
async fn trigger_update_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    update::trigger_self_update(&app_state.config.update_log_path()).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "started": true })),
    ))
}

use axum::{Json, Router, extract::State, routing::post};
use std::sync::Arc;
use tracing::info;

use crate::sync::catalog::{self, SyncReport};
use crate::web::{AppError, AppState};

pub fn sync_router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(trigger_sync_handler))
}

async fn trigger_sync_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<SyncReport>, AppError> {
    // Same guard as the scheduler; a sync already in flight wins.
    let Ok(_held) = app_state.sync_guard.try_lock() else {
        return Err(AppError::Conflict(
            "A catalog sync is already running".to_string(),
        ));
    };
    info!("Manual catalog sync triggered.");
    let report =
        catalog::run_catalog_sync(&app_state.db, &app_state.config, &app_state.store).await?;
    Ok(Json(report))
}

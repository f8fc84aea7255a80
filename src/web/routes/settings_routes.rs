use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use std::sync::Arc;

use crate::db::services as db_services;
use crate::db::services::settings_service::KEY_AUTH_PASSWORD_HASH;
use crate::web::{AppError, AppState};

pub fn settings_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_all_settings_handler))
        .route(
            "/{key}",
            get(get_setting_handler)
                .put(update_setting_handler)
                .delete(delete_setting_handler),
        )
}

// The password hash never leaves the server; it is managed through the
// dedicated password endpoint.
fn reject_protected_key(key: &str) -> Result<(), AppError> {
    if key == KEY_AUTH_PASSWORD_HASH {
        return Err(AppError::InvalidInput(format!(
            "Setting '{key}' cannot be accessed directly"
        )));
    }
    Ok(())
}

async fn get_all_settings_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let settings = db_services::get_all_settings(&app_state.db).await?;
    let map: serde_json::Map<String, serde_json::Value> = settings
        .into_iter()
        .filter(|s| s.key != KEY_AUTH_PASSWORD_HASH)
        .map(|s| (s.key, s.value))
        .collect();
    Ok(Json(serde_json::Value::Object(map)))
}

async fn get_setting_handler(
    State(app_state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    reject_protected_key(&key)?;
    let setting = db_services::get_setting(&app_state.db, &key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Setting '{key}' not found")))?;
    Ok(Json(setting.value))
}

async fn update_setting_handler(
    State(app_state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(value): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    reject_protected_key(&key)?;
    if key.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "Setting key must not be empty".to_string(),
        ));
    }
    db_services::update_setting(&app_state.db, &key, &value).await?;
    Ok(Json(value))
}

async fn delete_setting_handler(
    State(app_state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    reject_protected_key(&key)?;
    db_services::delete_setting(&app_state.db, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::entities::installed_script::{self, InstallStatus};
use crate::db::services as db_services;
use crate::db::services::installed_service::InstalledUpdate;
use crate::proxmox;
use crate::ssh::SshSession;
use crate::web::{AppError, AppState};

pub fn installed_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_installed_handler).post(create_installed_handler))
        .route("/detect", post(detect_all_handler))
        .route("/detect/{server_id}", post(detect_one_handler))
        .route(
            "/{id}",
            get(get_installed_handler)
                .put(update_installed_handler)
                .delete(delete_installed_handler),
        )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstalledRequest {
    pub script_slug: String,
    pub server_id: Option<i32>,
    pub container_id: Option<i32>,
    #[serde(default = "default_status")]
    pub status: InstallStatus,
}

fn default_status() -> InstallStatus {
    InstallStatus::Success
}

async fn create_installed_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateInstalledRequest>,
) -> Result<(StatusCode, Json<installed_script::Model>), AppError> {
    if payload.script_slug.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "Script slug must not be empty".to_string(),
        ));
    }
    if let Some(server_id) = payload.server_id {
        db_services::get_server(&app_state.db, server_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Server {server_id} not found")))?;
    }
    let model = db_services::create_installed(
        &app_state.db,
        &payload.script_slug,
        payload.server_id,
        payload.container_id,
        payload.status,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(model)))
}

async fn list_installed_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<installed_script::Model>>, AppError> {
    Ok(Json(db_services::list_installed(&app_state.db).await?))
}

async fn get_installed_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<installed_script::Model>, AppError> {
    let model = db_services::get_installed(&app_state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Installed-script record {id} not found")))?;
    Ok(Json(model))
}

/// An absent key keeps the stored value; an explicit `null` clears it.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInstalledRequest {
    #[serde(default, deserialize_with = "field_update")]
    pub container_id: Option<Option<i32>>,
    pub status: Option<InstallStatus>,
    #[serde(default, deserialize_with = "field_update")]
    pub web_ui_url: Option<Option<String>>,
}

/// Wraps a present value (including `null`) so it is distinguishable
/// from a missing key.
fn field_update<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

async fn update_installed_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateInstalledRequest>,
) -> Result<Json<installed_script::Model>, AppError> {
    let existing = db_services::get_installed(&app_state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Installed-script record {id} not found")))?;
    let model = db_services::update_installed(
        &app_state.db,
        existing,
        InstalledUpdate {
            container_id: payload.container_id,
            status: payload.status,
            web_ui_url: payload.web_ui_url,
        },
    )
    .await?;
    Ok(Json(model))
}

async fn delete_installed_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let deleted = db_services::delete_installed(&app_state.db, id).await?;
    if deleted == 0 {
        return Err(AppError::NotFound(format!(
            "Installed-script record {id} not found"
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionOutcome {
    pub server_id: i32,
    pub server_name: String,
    pub detected: usize,
    pub error: Option<String>,
}

/// Best-effort container scan across every configured server. One
/// server failing does not block the others; each outcome is reported
/// on its own.
async fn detect_all_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<DetectionOutcome>>, AppError> {
    let servers = db_services::list_servers(&app_state.db).await?;
    let mut outcomes = Vec::with_capacity(servers.len());

    for server in servers {
        let outcome = detect_on_server(&app_state, &server).await;
        outcomes.push(match outcome {
            Ok(detected) => {
                info!(server = %server.name, detected, "Container detection finished.");
                DetectionOutcome {
                    server_id: server.id,
                    server_name: server.name,
                    detected,
                    error: None,
                }
            }
            Err(e) => {
                warn!(server = %server.name, error = %e, "Container detection failed.");
                DetectionOutcome {
                    server_id: server.id,
                    server_name: server.name,
                    detected: 0,
                    error: Some(e.to_string()),
                }
            }
        });
    }

    Ok(Json(outcomes))
}

async fn detect_one_handler(
    State(app_state): State<Arc<AppState>>,
    Path(server_id): Path<i32>,
) -> Result<Json<DetectionOutcome>, AppError> {
    let server = db_services::get_server(&app_state.db, server_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Server {server_id} not found")))?;
    let detected = detect_on_server(&app_state, &server).await?;
    Ok(Json(DetectionOutcome {
        server_id: server.id,
        server_name: server.name,
        detected,
        error: None,
    }))
}

async fn detect_on_server(
    app_state: &AppState,
    server: &crate::db::entities::server::Model,
) -> Result<usize, AppError> {
    let session = SshSession::open(server, &app_state.config.credential_encryption_key).await?;
    let result = scan_and_upsert(app_state, server.id, &session).await;
    session.close().await;
    result
}

async fn scan_and_upsert(
    app_state: &AppState,
    server_id: i32,
    session: &SshSession,
) -> Result<usize, AppError> {
    let containers = proxmox::list_tagged_containers(session)
        .await
        .map_err(|e| AppError::SshError(e.to_string()))?;

    // No tagged containers: nothing to upsert, existing records stay.
    let mut count = 0;
    for container in containers {
        let ip = proxmox::detect_container_ip(session, container.ctid)
            .await
            .unwrap_or(None);
        let web_ui_url = match ip {
            Some(ip) => {
                let port = db_services::get_script_by_slug(&app_state.db, &container.slug)
                    .await?
                    .and_then(|s| s.interface_port);
                Some(match port {
                    Some(port) => format!("{ip}:{port}"),
                    None => ip,
                })
            }
            None => None,
        };
        db_services::upsert_detected(
            &app_state.db,
            server_id,
            container.ctid,
            &container.slug,
            web_ui_url,
        )
        .await?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_payload_tells_absent_from_null() {
        let absent: UpdateInstalledRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.container_id, None);
        assert_eq!(absent.web_ui_url, None);

        let cleared: UpdateInstalledRequest =
            serde_json::from_str(r#"{"containerId": null, "webUiUrl": null}"#).unwrap();
        assert_eq!(cleared.container_id, Some(None));
        assert_eq!(cleared.web_ui_url, Some(None));

        let set: UpdateInstalledRequest =
            serde_json::from_str(r#"{"containerId": 104, "webUiUrl": "10.0.0.5:7575"}"#).unwrap();
        assert_eq!(set.container_id, Some(Some(104)));
        assert_eq!(set.web_ui_url, Some(Some("10.0.0.5:7575".to_owned())));
    }
}

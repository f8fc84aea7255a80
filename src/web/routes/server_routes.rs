use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

use crate::db::entities::server::{self, AuthType};
use crate::db::services as db_services;
use crate::db::services::server_service::ServerRecord;
use crate::proxmox;
use crate::services::secrets;
use crate::ssh::SshSession;
use crate::web::{AppError, AppState};

pub fn server_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_servers_handler).post(create_server_handler))
        .route(
            "/{id}",
            get(get_server_handler)
                .put(update_server_handler)
                .delete(delete_server_handler),
        )
        .route("/{id}/test", post(test_connection_handler))
        .route("/{id}/storages", get(list_storages_handler))
        .route("/{id}/containers/{ctid}/start", post(start_container_handler))
        .route("/{id}/containers/{ctid}/stop", post(stop_container_handler))
        .route(
            "/{id}/containers/{ctid}/destroy",
            post(destroy_container_handler),
        )
        .route(
            "/{id}/containers/{ctid}/backup",
            post(create_backup_handler),
        )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRequest {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: i32,
    pub username: String,
    pub auth_type: AuthType,
    // Omitted credentials keep the stored ones on update.
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub key_passphrase: Option<String>,
    pub color: Option<String>,
}

fn default_port() -> i32 {
    22
}

impl ServerRequest {
    fn validate(&self, is_create: bool) -> Result<(), AppError> {
        if self.name.trim().is_empty() || self.host.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Server name and host must not be empty".to_string(),
            ));
        }
        if self.username.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "SSH username must not be empty".to_string(),
            ));
        }
        if is_create {
            match self.auth_type {
                AuthType::Password if self.password.is_none() => {
                    return Err(AppError::InvalidInput(
                        "Password auth requires a password".to_string(),
                    ));
                }
                AuthType::Key if self.private_key.is_none() => {
                    return Err(AppError::InvalidInput(
                        "Key auth requires a private key".to_string(),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn into_record(self, credential_key: &str) -> Result<ServerRecord, AppError> {
        let encrypt_opt = |value: Option<String>| -> Result<Option<String>, AppError> {
            value
                .map(|v| secrets::encrypt(&v, credential_key))
                .transpose()
                .map_err(AppError::InternalServerError)
        };
        Ok(ServerRecord {
            name: self.name,
            host: self.host,
            port: self.port,
            username: self.username,
            auth_type: self.auth_type,
            password_enc: encrypt_opt(self.password)?,
            private_key_enc: encrypt_opt(self.private_key)?,
            key_passphrase_enc: encrypt_opt(self.key_passphrase)?,
            color: self.color,
        })
    }
}

async fn create_server_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ServerRequest>,
) -> Result<(StatusCode, Json<server::Model>), AppError> {
    payload.validate(true)?;
    let record = payload.into_record(&app_state.config.credential_encryption_key)?;
    let model = db_services::create_server(&app_state.db, record).await?;
    Ok((StatusCode::CREATED, Json(model)))
}

async fn list_servers_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<server::Model>>, AppError> {
    Ok(Json(db_services::list_servers(&app_state.db).await?))
}

async fn get_server_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<server::Model>, AppError> {
    let model = db_services::get_server(&app_state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Server {id} not found")))?;
    Ok(Json(model))
}

async fn update_server_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(payload): Json<ServerRequest>,
) -> Result<Json<server::Model>, AppError> {
    payload.validate(false)?;
    let existing = db_services::get_server(&app_state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Server {id} not found")))?;
    let record = payload.into_record(&app_state.config.credential_encryption_key)?;
    let model = db_services::update_server(&app_state.db, existing, record).await?;
    Ok(Json(model))
}

async fn delete_server_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let deleted = db_services::delete_server(&app_state.db, id).await?;
    if deleted == 0 {
        return Err(AppError::NotFound(format!("Server {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn open_session(app_state: &AppState, id: i32) -> Result<SshSession, AppError> {
    let server = db_services::get_server(&app_state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Server {id} not found")))?;
    Ok(SshSession::open(&server, &app_state.config.credential_encryption_key).await?)
}

async fn test_connection_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = open_session(&app_state, id).await?;
    let result = session.exec("echo ok").await;
    session.close().await;
    match result {
        Ok(output) if output.success() => Ok(Json(serde_json::json!({ "success": true }))),
        Ok(output) => Err(AppError::SshError(format!(
            "test command exited with {}",
            output.exit_code
        ))),
        Err(e) => Err(e.into()),
    }
}

async fn list_storages_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<proxmox::StorageEntry>>, AppError> {
    let session = open_session(&app_state, id).await?;
    let result = proxmox::list_storages(&session).await;
    session.close().await;
    result
        .map(Json)
        .map_err(|e| AppError::SshError(e.to_string()))
}

async fn container_action(
    app_state: &AppState,
    id: i32,
    ctid: i32,
    action: &str,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = open_session(app_state, id).await?;
    let result = match action {
        "start" => proxmox::start_container(&session, ctid).await,
        "stop" => proxmox::stop_container(&session, ctid).await,
        "destroy" => proxmox::destroy_container(&session, ctid).await,
        _ => unreachable!("fixed action set"),
    };
    session.close().await;
    match result {
        Ok(()) => Ok(Json(serde_json::json!({ "success": true }))),
        Err(e) => {
            error!(server_id = id, ctid = ctid, action = action, error = %e, "Container action failed.");
            Err(AppError::SshError(e.to_string()))
        }
    }
}

async fn start_container_handler(
    State(app_state): State<Arc<AppState>>,
    Path((id, ctid)): Path<(i32, i32)>,
) -> Result<Json<serde_json::Value>, AppError> {
    container_action(&app_state, id, ctid, "start").await
}

async fn stop_container_handler(
    State(app_state): State<Arc<AppState>>,
    Path((id, ctid)): Path<(i32, i32)>,
) -> Result<Json<serde_json::Value>, AppError> {
    container_action(&app_state, id, ctid, "stop").await
}

async fn destroy_container_handler(
    State(app_state): State<Arc<AppState>>,
    Path((id, ctid)): Path<(i32, i32)>,
) -> Result<Json<serde_json::Value>, AppError> {
    container_action(&app_state, id, ctid, "destroy").await
}

#[derive(Deserialize)]
pub struct BackupRequest {
    pub storage: String,
}

async fn create_backup_handler(
    State(app_state): State<Arc<AppState>>,
    Path((id, ctid)): Path<(i32, i32)>,
    Json(payload): Json<BackupRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if payload.storage.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "Backup storage must not be empty".to_string(),
        ));
    }
    let session = open_session(&app_state, id).await?;
    let result = proxmox::create_backup(&session, ctid, &payload.storage).await;
    session.close().await;
    match result {
        Ok(output) => Ok(Json(serde_json::json!({ "success": true, "output": output }))),
        Err(e) => Err(AppError::SshError(e.to_string())),
    }
}

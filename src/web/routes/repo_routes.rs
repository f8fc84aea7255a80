use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::entities::source_repo;
use crate::db::services as db_services;
use crate::db::services::repo_service::RepoInput;
use crate::web::{AppError, AppState};

pub fn repo_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_repos_handler).post(create_repo_handler))
        .route(
            "/{id}",
            get(get_repo_handler)
                .put(update_repo_handler)
                .delete(delete_repo_handler),
        )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoRequest {
    pub name: String,
    pub owner_repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub json_path: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub auto_download: bool,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

impl RepoRequest {
    fn validate(&self) -> Result<(), AppError> {
        // "owner/repo", nothing fancier.
        let parts: Vec<&str> = self.owner_repo.split('/').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(AppError::InvalidInput(format!(
                "'{}' is not an owner/repo reference",
                self.owner_repo
            )));
        }
        if self.json_path.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Descriptor path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn into_input(self) -> RepoInput {
        RepoInput {
            name: self.name,
            owner_repo: self.owner_repo,
            branch: self.branch,
            json_path: self.json_path,
            enabled: self.enabled,
            auto_download: self.auto_download,
        }
    }
}

async fn list_repos_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<source_repo::Model>>, AppError> {
    Ok(Json(db_services::list_repos(&app_state.db).await?))
}

async fn get_repo_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<source_repo::Model>, AppError> {
    let model = db_services::get_repo(&app_state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Source repository {id} not found")))?;
    Ok(Json(model))
}

async fn create_repo_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<RepoRequest>,
) -> Result<(StatusCode, Json<source_repo::Model>), AppError> {
    payload.validate()?;
    let model = db_services::create_repo(&app_state.db, payload.into_input()).await?;
    Ok((StatusCode::CREATED, Json(model)))
}

async fn update_repo_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(payload): Json<RepoRequest>,
) -> Result<Json<source_repo::Model>, AppError> {
    payload.validate()?;
    let existing = db_services::get_repo(&app_state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Source repository {id} not found")))?;
    let model = db_services::update_repo(&app_state.db, existing, payload.into_input()).await?;
    Ok(Json(model))
}

async fn delete_repo_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let existing = db_services::get_repo(&app_state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Source repository {id} not found")))?;
    if existing.is_default {
        return Err(AppError::Conflict(
            "The default source repository cannot be deleted".to_string(),
        ));
    }
    db_services::delete_repo(&app_state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

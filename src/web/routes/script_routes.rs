use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use serde::Serialize;
use std::sync::Arc;

use crate::db::entities::{category, script, source_repo};
use crate::db::services as db_services;
use crate::sync::catalog;
use crate::web::{AppError, AppState};

pub fn script_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_scripts_handler))
        .route("/downloaded", get(list_downloaded_handler))
        .route("/{slug}", get(get_script_handler))
        .route("/{slug}/load", post(load_script_handler))
        .route("/{slug}/up-to-date", get(up_to_date_handler))
        .route("/{slug}/files", delete(delete_files_handler))
}

pub fn category_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_categories_handler))
}

async fn find_script(app_state: &AppState, slug: &str) -> Result<script::Model, AppError> {
    db_services::get_script_by_slug(&app_state.db, slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Script '{slug}' not found")))
}

async fn find_script_repo(
    app_state: &AppState,
    script: &script::Model,
) -> Result<source_repo::Model, AppError> {
    db_services::get_repo(&app_state.db, script.source_repo_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Source repository for '{}' no longer exists",
                script.slug
            ))
        })
}

async fn list_scripts_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<script::Model>>, AppError> {
    Ok(Json(db_services::list_scripts(&app_state.db).await?))
}

async fn list_categories_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<category::Model>>, AppError> {
    Ok(Json(db_services::list_categories(&app_state.db).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScriptDetailResponse {
    #[serde(flatten)]
    script: script::Model,
    downloaded: bool,
}

async fn is_downloaded(app_state: &AppState, script: &script::Model) -> bool {
    let paths = catalog::method_script_paths(&script.install_methods);
    if paths.is_empty() {
        return false;
    }
    for path in paths {
        if !app_state.store.exists(&path).await {
            return false;
        }
    }
    true
}

async fn get_script_handler(
    State(app_state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<ScriptDetailResponse>, AppError> {
    let script = find_script(&app_state, &slug).await?;
    let downloaded = is_downloaded(&app_state, &script).await;
    Ok(Json(ScriptDetailResponse { script, downloaded }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadScriptResponse {
    slug: String,
    saved_files: Vec<String>,
}

async fn load_script_handler(
    State(app_state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<LoadScriptResponse>, AppError> {
    let script = find_script(&app_state, &slug).await?;
    let repo = find_script_repo(&app_state, &script).await?;
    let client = catalog::github_client_from_settings(&app_state.db, &app_state.config).await?;
    let saved_files = catalog::download_script_files(
        &client,
        &app_state.store,
        &repo,
        &script.slug,
        &script.install_methods,
    )
    .await?;
    Ok(Json(LoadScriptResponse {
        slug: script.slug,
        saved_files,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpToDateResponse {
    slug: String,
    downloaded: bool,
    up_to_date: bool,
}

async fn up_to_date_handler(
    State(app_state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<UpToDateResponse>, AppError> {
    let script = find_script(&app_state, &slug).await?;
    let downloaded = is_downloaded(&app_state, &script).await;
    if !downloaded {
        return Ok(Json(UpToDateResponse {
            slug,
            downloaded: false,
            up_to_date: false,
        }));
    }
    let repo = find_script_repo(&app_state, &script).await?;
    let client = catalog::github_client_from_settings(&app_state.db, &app_state.config).await?;
    let up_to_date = catalog::is_up_to_date(&client, &app_state.store, &repo, &script).await?;
    Ok(Json(UpToDateResponse {
        slug,
        downloaded: true,
        up_to_date,
    }))
}

async fn delete_files_handler(
    State(app_state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let script = find_script(&app_state, &slug).await?;
    let mut removed = 0;
    for path in catalog::method_script_paths(&script.install_methods) {
        if app_state.store.delete(&path).await? {
            removed += 1;
        }
    }
    Ok(Json(serde_json::json!({ "slug": slug, "removed": removed })))
}

async fn list_downloaded_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, AppError> {
    let scripts = db_services::list_scripts(&app_state.db).await?;
    let mut downloaded = Vec::new();
    for script in scripts {
        if is_downloaded(&app_state, &script).await {
            downloaded.push(script.slug);
        }
    }
    Ok(Json(downloaded))
}

use axum::{
    Json, Router,
    extract::State,
    http::{Method, StatusCode, Uri, header},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use rust_embed::RustEmbed;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServerConfig;
use crate::script_store::ScriptStore;
use crate::services::auth_service;
use crate::sync::scheduler::SyncGuard;
use crate::version::VERSION;
use crate::web::{
    handlers::{install_ws_handler, update_log_ws_handler},
    middleware::auth,
    models::{ChangePasswordRequest, LoginRequest},
    routes::*,
};

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;

pub use error::AppError;

#[derive(RustEmbed, Clone)]
#[folder = "frontend/dist"]
pub struct Assets;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<ServerConfig>,
    pub store: ScriptStore,
    pub sync_guard: SyncGuard,
}

async fn login_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let login_response =
        auth_service::login(&app_state.db, &payload.password, &app_state.config.jwt_secret).await?;

    let auth_cookie = Cookie::build(("token", login_response.token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    let mut response = Json(login_response).into_response();
    let cookie_value = auth_cookie
        .to_string()
        .parse()
        .map_err(|e| AppError::InternalServerError(format!("Invalid cookie value: {e}")))?;
    response
        .headers_mut()
        .insert(header::SET_COOKIE, cookie_value);
    Ok(response)
}

async fn change_password_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth_service::set_password(
        &app_state.db,
        payload.current_password.as_deref(),
        &payload.new_password,
    )
    .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn auth_status_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let required = auth_service::auth_required(&app_state.db).await?;
    Ok(Json(serde_json::json!({ "authRequired": required })))
}

async fn health_check_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "version": VERSION }))
}

/// Serves the embedded frontend. Unknown paths fall back to
/// `index.html` so client-side routing works after a refresh.
async fn static_handler(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    let path = if path.is_empty() { "index.html" } else { path };

    match Assets::get(path).or_else(|| Assets::get("index.html")) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref().to_owned())],
                content.data.into_owned(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let protect =
        || axum_middleware::from_fn_with_state(app_state.clone(), auth::auth);

    Router::new()
        .route("/api/health", get(health_check_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/status", get(auth_status_handler))
        .route(
            "/api/auth/password",
            post(change_password_handler).route_layer(protect()),
        )
        .nest(
            "/api/servers",
            server_routes::server_router().route_layer(protect()),
        )
        .nest(
            "/api/repos",
            repo_routes::repo_router().route_layer(protect()),
        )
        .nest(
            "/api/scripts",
            script_routes::script_router().route_layer(protect()),
        )
        .nest(
            "/api/categories",
            script_routes::category_router().route_layer(protect()),
        )
        .nest(
            "/api/installed",
            installed_routes::installed_router().route_layer(protect()),
        )
        .nest(
            "/api/settings",
            settings_routes::settings_router().route_layer(protect()),
        )
        .nest(
            "/api/sync",
            sync_routes::sync_router().route_layer(protect()),
        )
        .nest(
            "/api/update",
            update_routes::update_router().route_layer(protect()),
        )
        .route("/ws/install", get(install_ws_handler::install_ws_handler))
        .route(
            "/ws/update-log",
            get(update_log_ws_handler::update_log_ws_handler),
        )
        .fallback(static_handler)
        .with_state(app_state)
        .layer(cors)
}

use axum::{
    body::Body as AxumBody,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{DecodingKey, Validation, decode};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::warn;

use crate::services::auth_service;
use crate::web::models::Claims;
use crate::web::{AppState, error::AppError};

/// Checks the admin JWT on protected routes. When no password is
/// configured (or auth is toggled off) every request passes through.
pub async fn auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    req: Request<AxumBody>,
    next: Next,
) -> Result<Response, AppError> {
    authorize(&state.db, &state.config.jwt_secret, req.headers(), &jar).await?;
    Ok(next.run(req).await)
}

/// Token check shared by the middleware and the websocket upgrades.
/// The Authorization header is tried first, then the cookie set at
/// login.
pub async fn authorize(
    db: &DatabaseConnection,
    jwt_secret: &str,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> Result<(), AppError> {
    if !auth_service::auth_required(db).await? {
        return Ok(());
    }

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(|s| s.to_string())
        .or_else(|| jar.get("token").map(|c| c.value().to_string()))
        .ok_or(AppError::InvalidCredentials)?;

    decode::<Claims>(
        &token,
        &DecodingKey::from_secret(jwt_secret.as_ref()),
        &Validation::default(),
    )
    .map_err(|e| {
        warn!(error = ?e, "JWT validation failed.");
        AppError::InvalidCredentials
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use axum_extra::extract::cookie::Cookie;
    use sea_orm::Database;

    async fn test_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        schema::init_schema(&db).await.unwrap();
        db
    }

    #[tokio::test]
    async fn open_instance_lets_anonymous_requests_through() {
        let db = test_db().await;
        authorize(&db, "secret", &HeaderMap::new(), &CookieJar::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn configured_auth_rejects_anonymous_requests() {
        let db = test_db().await;
        auth_service::set_password(&db, None, "correct horse")
            .await
            .unwrap();
        let err = authorize(&db, "secret", &HeaderMap::new(), &CookieJar::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
    }

    #[tokio::test]
    async fn bearer_token_and_login_cookie_both_authorize() {
        let db = test_db().await;
        auth_service::set_password(&db, None, "correct horse")
            .await
            .unwrap();
        let token = auth_service::create_admin_jwt("secret").unwrap().token;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        authorize(&db, "secret", &headers, &CookieJar::new())
            .await
            .unwrap();

        let jar = CookieJar::new().add(Cookie::new("token", token));
        authorize(&db, "secret", &HeaderMap::new(), &jar)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn token_signed_with_another_secret_is_rejected() {
        let db = test_db().await;
        auth_service::set_password(&db, None, "correct horse")
            .await
            .unwrap();
        let token = auth_service::create_admin_jwt("other-secret").unwrap().token;
        let jar = CookieJar::new().add(Cookie::new("token", token));
        let err = authorize(&db, "secret", &HeaderMap::new(), &jar)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
    }
}

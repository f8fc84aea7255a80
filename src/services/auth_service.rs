//! Single-admin authentication. The password hash lives in the
//! settings table; a successful login issues a 24 hour JWT that the
//! auth middleware checks on every protected route.

use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use sea_orm::DatabaseConnection;

use crate::db::services as db_services;
use crate::db::services::settings_service::{KEY_AUTH_ENABLED, KEY_AUTH_PASSWORD_HASH};
use crate::web::error::AppError;
use crate::web::models::{Claims, LoginResponse};

pub const ADMIN_SUBJECT: &str = "admin";

/// Whether login is required at all. Auth is active only when it is
/// enabled and a password has been set.
pub async fn auth_required(db: &DatabaseConnection) -> Result<bool, AppError> {
    let enabled = db_services::get_bool_setting(db, KEY_AUTH_ENABLED, false).await?;
    if !enabled {
        return Ok(false);
    }
    Ok(db_services::get_string_setting(db, KEY_AUTH_PASSWORD_HASH)
        .await?
        .is_some())
}

pub async fn login(
    db: &DatabaseConnection,
    password: &str,
    jwt_secret: &str,
) -> Result<LoginResponse, AppError> {
    if password.is_empty() {
        return Err(AppError::InvalidInput("Password must not be empty".to_string()));
    }

    let stored_hash = db_services::get_string_setting(db, KEY_AUTH_PASSWORD_HASH)
        .await?
        .ok_or_else(|| AppError::Unauthorized("No admin password configured".to_string()))?;

    let valid = verify(password, &stored_hash)
        .map_err(|e| AppError::InternalServerError(format!("Password verification failed: {e}")))?;
    if !valid {
        return Err(AppError::InvalidCredentials);
    }

    create_admin_jwt(jwt_secret)
}

pub fn create_admin_jwt(jwt_secret: &str) -> Result<LoginResponse, AppError> {
    let now = Utc::now();
    let expiration = (now + Duration::hours(24)).timestamp() as usize;

    let claims = Claims {
        sub: ADMIN_SUBJECT.to_string(),
        exp: expiration,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_ref()),
    )
    .map_err(|e| AppError::TokenCreationError(e.to_string()))?;

    Ok(LoginResponse { token })
}

/// Sets or changes the admin password. When a hash already exists the
/// current password must be supplied and match.
pub async fn set_password(
    db: &DatabaseConnection,
    current: Option<&str>,
    new: &str,
) -> Result<(), AppError> {
    if new.len() < 8 {
        return Err(AppError::InvalidInput(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    if let Some(stored_hash) = db_services::get_string_setting(db, KEY_AUTH_PASSWORD_HASH).await? {
        let current = current.ok_or(AppError::InvalidCredentials)?;
        let valid = verify(current, &stored_hash).map_err(|e| {
            AppError::InternalServerError(format!("Password verification failed: {e}"))
        })?;
        if !valid {
            return Err(AppError::InvalidCredentials);
        }
    }

    let new_hash =
        hash(new, DEFAULT_COST).map_err(|e| AppError::PasswordHashingError(e.to_string()))?;
    db_services::update_setting(db, KEY_AUTH_PASSWORD_HASH, &serde_json::json!(new_hash)).await?;
    db_services::update_setting(db, KEY_AUTH_ENABLED, &serde_json::json!(true)).await?;
    Ok(())
}

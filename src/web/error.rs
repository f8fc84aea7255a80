use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("GitHub API rate limit exceeded")]
    RateLimited,
    #[error("GitHub error: {0}")]
    GithubError(String),
    #[error("SSH error: {0}")]
    SshError(String),
    #[error("Filesystem error: {0}")]
    FilesystemError(String),
    #[error("JWT creation failed: {0}")]
    TokenCreationError(String),
    #[error("Password hashing failed: {0}")]
    PasswordHashingError(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string())
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::DatabaseError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {msg}"),
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "GitHub API rate limit exceeded".to_string(),
            ),
            AppError::GithubError(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::SshError(msg) => (StatusCode::BAD_GATEWAY, format!("SSH error: {msg}")),
            AppError::FilesystemError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::TokenCreationError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Token creation error: {msg}"),
            ),
            AppError::PasswordHashingError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Password hashing error: {msg}"),
            ),
            AppError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": error_message }))).into_response()
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalServerError(format!("JSON serialization/deserialization error: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::FilesystemError(err.to_string())
    }
}

impl From<crate::github::GithubError> for AppError {
    fn from(err: crate::github::GithubError) -> Self {
        match err {
            crate::github::GithubError::RateLimited => AppError::RateLimited,
            other => AppError::GithubError(other.to_string()),
        }
    }
}

impl From<crate::ssh::SshError> for AppError {
    fn from(err: crate::ssh::SshError) -> Self {
        AppError::SshError(err.to_string())
    }
}

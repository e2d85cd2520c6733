//! Unified application error model and mapping helpers.
//! `AuthError` is the domain error raised by the identity layer; `AppError` is the
//! wire-facing shape returned by HTTP handlers, with a stable `code` and a status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Message returned for every failed login, whatever the underlying reason.
pub const GENERIC_LOGIN_FAILURE: &str = "invalid email or password";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("authenticated identity has no local user record: {email}")]
    PrincipalNotFound { email: String },
    #[error("external service failure: {0}")]
    ExternalServiceFailure(String),
    #[error("partial deletion of user {user_id}: local_removed={local_removed} identity_removed={identity_removed}: {detail}")]
    PartialDeletionFailure {
        user_id: String,
        local_removed: bool,
        identity_removed: bool,
        detail: String,
    },
    #[error("email already registered")]
    EmailAlreadyExists,
    #[error("password must have at least {min} characters")]
    WeakPassword { min: usize },
    #[error("invalid email address")]
    InvalidEmail,
    #[error("user not found")]
    UserNotFound,
    #[error("invalid or expired reset code")]
    InvalidResetCode,
    #[error("operation requires admin access")]
    Forbidden,
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        AuthError::ExternalServiceFailure(format!("{err:#}"))
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    Auth { code: String, message: String },
    Forbidden { code: String, message: String },
    Io { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::Io { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::Io { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn forbidden<S: Into<String>>(code: S, msg: S) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn io<S: Into<String>>(code: S, msg: S) -> Self { AppError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::Auth { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::Io { .. } => 503,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            // Login failures collapse into one message so callers cannot enumerate accounts
            AuthError::InvalidCredentials | AuthError::PrincipalNotFound { .. } => {
                AppError::auth("invalid_credentials", GENERIC_LOGIN_FAILURE)
            }
            AuthError::ExternalServiceFailure(_) => {
                AppError::io("service_unavailable", "authentication service unavailable")
            }
            e @ AuthError::PartialDeletionFailure { .. } => AppError::internal("partial_deletion".to_string(), e.to_string()),
            e @ AuthError::EmailAlreadyExists => AppError::conflict("email_already_exists".to_string(), e.to_string()),
            e @ AuthError::WeakPassword { .. } => AppError::user("weak_password".to_string(), e.to_string()),
            e @ AuthError::InvalidEmail => AppError::user("invalid_email".to_string(), e.to_string()),
            e @ AuthError::UserNotFound => AppError::not_found("user_not_found".to_string(), e.to_string()),
            e @ AuthError::InvalidResetCode => AppError::user("invalid_reset_code".to_string(), e.to_string()),
            e @ AuthError::Forbidden => AppError::forbidden("forbidden".to_string(), e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({
            "status": "error",
            "code": self.code_str(),
            "error": self.message(),
        });
        (status, Json(body)).into_response()
    }
}

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

use super::ApiResponse;
use crate::auth::TokenError;
use crate::services::{AccountError, BlogError, DrawingError, GameError};
use crate::store::StoreError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),

    ValidationError(String),

    Conflict(String),

    /// Message goes to the client as is.
    Unauthorized(String),

    Forbidden(String),

    /// Lock or I/O trouble in the record store. Reported as 503; the request
    /// is not retried.
    Unavailable(String),

    /// A cascade that stopped partway. Reported, not hidden.
    Incomplete(String),

    DatabaseError(String),

    InternalError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "Not found: {msg}"),
            Self::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            Self::Conflict(msg) => write!(f, "Conflict: {msg}"),
            Self::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            Self::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            Self::Unavailable(msg) => write!(f, "Unavailable: {msg}"),
            Self::Incomplete(msg) => write!(f, "Incomplete: {msg}"),
            Self::DatabaseError(msg) => write!(f, "Database error: {msg}"),
            Self::InternalError(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::Unauthorized(msg) => {
                tracing::debug!("Rejected credentials: {}", msg);
                (StatusCode::UNAUTHORIZED, msg.clone())
            }
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            Self::Unavailable(msg) => {
                tracing::warn!("Record store unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Storage is temporarily unavailable".to_string(),
                )
            }
            Self::Incomplete(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Self::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ApiResponse::<()>::error(error_message);
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        Self::Unauthorized(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Lock { .. } | StoreError::Io { .. } => Self::Unavailable(err.to_string()),
            StoreError::Corrupt { .. } | StoreError::Task(_) => Self::InternalError(err.to_string()),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::UsernameExists => Self::Conflict(err.to_string()),
            AccountError::InvalidCredentials => Self::Unauthorized(err.to_string()),
            AccountError::NotFound => Self::NotFound(err.to_string()),
            AccountError::Validation(msg) => Self::validation(msg),
            AccountError::Token(e) => e.into(),
            AccountError::Store(e) => e.into(),
            AccountError::Internal(msg) => Self::internal(msg),
        }
    }
}

impl From<GameError> for ApiError {
    fn from(err: GameError) -> Self {
        match err {
            GameError::UnknownGame(msg) => Self::NotFound(msg),
            GameError::Validation(msg) => Self::validation(msg),
            GameError::PlayerNotFound => Self::NotFound(err.to_string()),
            GameError::Store(e) => e.into(),
        }
    }
}

impl From<DrawingError> for ApiError {
    fn from(err: DrawingError) -> Self {
        match err {
            DrawingError::Validation(msg) => Self::validation(msg),
            DrawingError::NotFound | DrawingError::ArtistNotFound => {
                Self::NotFound(err.to_string())
            }
            DrawingError::Store(e) => e.into(),
        }
    }
}

impl From<BlogError> for ApiError {
    fn from(err: BlogError) -> Self {
        match err {
            BlogError::Validation(msg) => Self::validation(msg),
            BlogError::NotFound => Self::NotFound(err.to_string()),
            BlogError::Forbidden => Self::Forbidden(err.to_string()),
            BlogError::Store(e) => e.into(),
            BlogError::Database(msg) => Self::DatabaseError(msg),
        }
    }
}

impl ApiError {
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        Self::NotFound(format!("{resource} {id} not found"))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }
}

//! Unified error handling for huddle.
//!
//! One taxonomy serves both entry paths: realtime events turn a
//! [`ChatError`] into an `error` frame for the originating connection, the
//! HTTP API turns it into a status code and JSON body.

use crate::db::DbError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use huddle_proto::ServerEvent;
use thiserror::Error;

/// Errors surfaced to clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Bad, missing or expired credential.
    #[error("{0}")]
    Authentication(String),

    /// Authenticated, but not allowed to touch the target.
    #[error("{0}")]
    AccessDenied(String),

    #[error("{0}")]
    NotFound(String),

    /// Empty content, bad file, missing field.
    #[error("{0}")]
    Validation(String),

    /// Storage failure or unexpected condition. The message is generic; the
    /// detail is logged where the error is created.
    #[error("{0}")]
    Internal(String),
}

impl ChatError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::AccessDenied(_) => "access_denied",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `error` frame sent back to the originating connection.
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::error(self.to_string())
    }

    pub fn not_participant() -> Self {
        Self::AccessDenied("You are not a participant of this chat".to_string())
    }
}

impl From<DbError> for ChatError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::UserNotFound(_) => Self::NotFound("User not found".to_string()),
            DbError::ChatNotFound(_) => Self::NotFound("Chat not found".to_string()),
            other => {
                tracing::error!(error = %other, "Storage error");
                Self::Internal("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "success": false,
            "message": self.to_string(),
        }));
        (self.status(), body).into_response()
    }
}

/// Result type for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;

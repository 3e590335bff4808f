use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use gighive_types::api::ErrorBody;

use crate::identity::IdentityError;
use crate::storage::StorageError;

/// Errors surfaced by REST handlers. Bodies are `{ "error": "..." }` with a
/// human-readable message; internal details only go to the log.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("{0}")]
    Conflict(String),

    #[error("profile deletion failed at {table}")]
    CascadeFailed { table: String },

    #[error("identity provider error: {0}")]
    Identity(#[from] IdentityError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::CascadeFailed { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Identity(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(e) => e.status_code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Internal(e) => {
                error!("Internal error: {:#}", e);
                "Internal server error".to_string()
            }
            Self::Identity(e) => {
                error!("Identity provider error: {}", e);
                "Identity provider unavailable".to_string()
            }
            Self::Storage(e) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                error!("Storage error: {}", e);
                "Storage unavailable".to_string()
            }
            Self::CascadeFailed { table } => {
                format!("Profile deletion failed while removing {table}; nothing was deleted")
            }
            other => other.to_string(),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

//! HTTP-facing error type.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::github::{SignatureError, WebhookError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid signature")]
    InvalidSignature(#[from] SignatureError),

    #[error("Invalid JSON payload")]
    InvalidJson(#[from] WebhookError),

    #[error("{}", .0.body_text())]
    BadRequest(#[from] JsonRejection),

    #[error("{0}")]
    Delivery(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidSignature(_) => StatusCode::FORBIDDEN,
            Self::InvalidJson(_) => StatusCode::BAD_REQUEST,
            Self::BadRequest(rejection) => rejection.status(),
            Self::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error body: `{"detail": ..., "timestamp": ...}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::InvalidSignature(cause) => error!(%cause, "rejecting webhook"),
            Self::InvalidJson(cause) => error!(%cause, "rejecting webhook"),
            Self::BadRequest(rejection) => error!(%rejection, "rejecting request body"),
            Self::Delivery(detail) => error!(%detail, "delivery failed"),
        }
        let body = ErrorResponse {
            detail: self.to_string(),
            timestamp: Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            AppError::from(SignatureError::Mismatch).status_code(),
            StatusCode::FORBIDDEN
        );
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(
            AppError::from(WebhookError::from(json_err)).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Delivery("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn detail_is_the_public_message() {
        let err = AppError::from(SignatureError::UnsupportedAlgorithm("sha1".into()));
        assert_eq!(err.to_string(), "Invalid signature");
    }
}

//! Unified API error handling
//!
//! Fairness and integrity violations get their own variants so they are never
//! collapsed into generic 4xx responses: callers and the audit trail both
//! need to distinguish a sealed-bid access refusal from a plain bad request.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Deadline passed: {0}")]
    DeadlinePassed(String),

    #[error("Sealed before deadline: {0}")]
    SealedBeforeDeadline(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error")]
    Database(#[from] sqlx::Error),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(anyhow::anyhow!(msg.into()))
    }

    /// True for the error kinds that represent a fairness or integrity
    /// violation. These are logged separately and never downgraded.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_) | Self::SealedBeforeDeadline(_) | Self::IntegrityViolation(_)
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::DeadlinePassed(_) | Self::SealedBeforeDeadline(_) => StatusCode::FORBIDDEN,
            Self::InvalidStateTransition(_) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::IntegrityViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InsufficientData(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UploadFailed(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::DeadlinePassed(_) => "DEADLINE_PASSED",
            Self::SealedBeforeDeadline(_) => "SEALED_BEFORE_DEADLINE",
            Self::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            Self::IntegrityViolation(_) => "INTEGRITY_VIOLATION",
            Self::InsufficientData(_) => "INSUFFICIENT_DATA",
            Self::UploadFailed(_) => "UPLOAD_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }

    fn public_message(&self) -> String {
        match self {
            // Don't leak internal error details
            Self::Internal(_) | Self::Database(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(e) => {
                tracing::error!(error = ?e, "Internal server error");
            }
            Self::Database(e) => {
                tracing::error!(error = ?e, "Database error");
            }
            e if e.is_integrity_failure() => {
                tracing::warn!(code = e.error_code(), error = %e, "Integrity failure");
            }
            _ => {
                tracing::warn!(error = %self, "API error");
            }
        }

        let status = self.status_code();
        let body = ErrorResponse {
            code: self.error_code().to_string(),
            message: self.public_message(),
            request_id: None, // Populated by middleware if available
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_failures_are_flagged() {
        assert!(ApiError::unauthorized("nope").is_integrity_failure());
        assert!(ApiError::SealedBeforeDeadline("early".into()).is_integrity_failure());
        assert!(ApiError::IntegrityViolation("self-approval".into()).is_integrity_failure());
        assert!(!ApiError::bad_request("oops").is_integrity_failure());
        assert!(!ApiError::DeadlinePassed("late".into()).is_integrity_failure());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            ApiError::SealedBeforeDeadline(String::new()).error_code(),
            "SEALED_BEFORE_DEADLINE"
        );
        assert_eq!(
            ApiError::InvalidStateTransition(String::new()).error_code(),
            "INVALID_STATE_TRANSITION"
        );
    }
}

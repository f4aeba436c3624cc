//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Settlement errors keep their machine-readable code and are mapped to an
//! HTTP status; `retryable` tells clients whether resubmitting the same
//! request can succeed. Internal error details are never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use escrow_core::CoreError;
use escrow_settlement::{ErrorClass, SettlementError};

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "CONGESTED").
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

#[derive(Error, Debug)]
pub enum AppError {
    /// Request body could not be parsed (422).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// No caller identity on the request (401).
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

impl AppError {
    /// HTTP status and machine-readable code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::UNPROCESSABLE_ENTITY, "BAD_REQUEST"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            Self::Settlement(err) => (settlement_status(err), err.code()),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Settlement(err) => err.class() == ErrorClass::TryAgain,
            _ => false,
        }
    }
}

fn settlement_status(err: &SettlementError) -> StatusCode {
    match err {
        SettlementError::Unauthorized(_) => StatusCode::FORBIDDEN,
        SettlementError::NotFound(_) => StatusCode::NOT_FOUND,
        SettlementError::AlreadyExists(_) => StatusCode::CONFLICT,
        SettlementError::PayeeNotConfigured(_) | SettlementError::Validation(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        SettlementError::InvalidState(_)
        | SettlementError::NotEligible(_)
        | SettlementError::WindowNotElapsed { .. }
        | SettlementError::WindowClosed { .. }
        | SettlementError::Blocked
        | SettlementError::Conflict { .. }
        | SettlementError::DriftAmbiguous { .. } => StatusCode::CONFLICT,
        SettlementError::Congested { .. } | SettlementError::ExternalServiceFailure(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SettlementError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Settlement(SettlementError::Internal(_)) => {
                tracing::error!(error = %self, "internal error");
                "An internal error occurred".to_string()
            }
            Self::Settlement(SettlementError::DriftAmbiguous { .. }) => {
                tracing::error!(error = %self, "request hit a quarantined course");
                self.to_string()
            }
            Self::Settlement(SettlementError::ExternalServiceFailure(_)) => {
                tracing::warn!(error = %self, "external service failure");
                self.to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                retryable: self.retryable(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self::Validation(err.to_string())
    }
}

//! # Custom Extractors & Validation
//!
//! Provides the [`Validate`] trait for request DTOs, helpers to extract and
//! validate JSON bodies in handlers, and the [`Caller`] extractor.

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::Json;

use escrow_core::UserId;
use escrow_settlement::CallerContext;

use crate::error::AppError;

/// Header carrying the authenticated caller's user id. Set by the gateway
/// in front of this service.
pub const CALLER_HEADER: &str = "x-caller-id";

/// Trait for request types that can validate their business rules
/// beyond what serde deserialization checks.
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body and validate it using the [`Validate`] trait.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate().map_err(AppError::Validation)?;
    Ok(value)
}

/// The caller of a request, from the [`CALLER_HEADER`] header.
#[derive(Debug, Clone)]
pub struct Caller(pub CallerContext);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(CALLER_HEADER)
            .ok_or_else(|| AppError::Unauthenticated(format!("missing {CALLER_HEADER} header")))?;
        let value = raw
            .to_str()
            .map_err(|_| AppError::Unauthenticated(format!("{CALLER_HEADER} is not valid text")))?;
        let user = UserId::new(value.trim())
            .map_err(|e| AppError::Unauthenticated(format!("{CALLER_HEADER}: {e}")))?;
        Ok(Caller(CallerContext::new(user)))
    }
}

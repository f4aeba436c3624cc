//! # Escrow Account API
//!
//! Routes:
//! - POST `/v1/escrow/accounts`: open an escrow for a course
//! - GET  `/v1/escrow/accounts/{course}`: current snapshot
//! - POST `/v1/escrow/accounts/{course}/payments`: record a payment
//! - GET  `/v1/escrow/accounts/{course}/engagement`: 40% tranche eligibility
//! - POST `/v1/escrow/accounts/{course}/withdrawals`: release a tranche
//! - POST `/v1/escrow/accounts/{course}/disputes`: file a dispute
//! - POST `/v1/escrow/accounts/{course}/disputes/resolve`: settle a dispute
//!
//! `{course}` is the human course id; it is hashed into the content-addressed
//! course id on every request. Handlers only translate between HTTP and the
//! settlement service.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use escrow_core::{Amount, CourseId, Timestamp, UserId};
use escrow_engine::{PaymentSignals, ResolutionAction, Tranche};
use escrow_settlement::{
    CreateAccountRequest, DisputeOutcome, EngagementReport, PaymentOutcome, PaymentRequest,
    ResolutionOutcome, Snapshot, WithdrawOutcome,
};

use crate::error::AppError;
use crate::extractors::{extract_validated_json, Caller, Validate};
use crate::state::AppState;

/// Fallback header for payment and withdrawal idempotency keys.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

// ── Request bodies ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAccountBody {
    pub human_course_id: String,
    pub payee_user_id: String,
    pub oracle_user_id: String,
    pub script_ref: Option<String>,
}

impl Validate for CreateAccountBody {
    fn validate(&self) -> Result<(), String> {
        if self.human_course_id.trim().is_empty() {
            return Err("human_course_id must be non-empty".into());
        }
        if self.payee_user_id == self.oracle_user_id {
            return Err("payee and oracle must be different users".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaymentBody {
    /// Gross amount in the smallest currency unit.
    pub gross_amount: Amount,
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub watch_met: bool,
    /// Rating in tenths of a star; 0 or absent means no rating.
    #[serde(default)]
    pub rating_tenths: u32,
    #[serde(default)]
    pub commented: bool,
    pub watched_at: Option<Timestamp>,
}

impl Validate for PaymentBody {
    fn validate(&self) -> Result<(), String> {
        if self.gross_amount == 0 {
            return Err("gross_amount must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WithdrawBody {
    pub tranche: Tranche,
    pub idempotency_key: Option<String>,
}

impl Validate for WithdrawBody {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisputeBody {
    pub reason: String,
}

impl Validate for DisputeBody {
    fn validate(&self) -> Result<(), String> {
        if self.reason.trim().is_empty() {
            return Err("reason must be non-empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveBody {
    pub action: ResolutionAction,
}

impl Validate for ResolveBody {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

// ── Router ──────────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/escrow/accounts", post(create_account))
        .route("/v1/escrow/accounts/{course}", get(get_snapshot))
        .route("/v1/escrow/accounts/{course}/payments", post(record_payment))
        .route(
            "/v1/escrow/accounts/{course}/engagement",
            get(evaluate_engagement),
        )
        .route("/v1/escrow/accounts/{course}/withdrawals", post(withdraw))
        .route("/v1/escrow/accounts/{course}/disputes", post(file_dispute))
        .route(
            "/v1/escrow/accounts/{course}/disputes/resolve",
            post(resolve_dispute),
        )
}

// ── Handlers ────────────────────────────────────────────────────────────

async fn create_account(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    body: Result<Json<CreateAccountBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Snapshot>), AppError> {
    let req = extract_validated_json(body)?;
    let request = CreateAccountRequest {
        human_course_id: req.human_course_id,
        payee: UserId::new(req.payee_user_id)?,
        oracle: UserId::new(req.oracle_user_id)?,
        script_ref: req.script_ref,
    };
    let snapshot = state.service.create_account(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn get_snapshot(
    State(state): State<AppState>,
    Path(course): Path<String>,
) -> Result<Json<Snapshot>, AppError> {
    let course = CourseId::derive(&course)?;
    Ok(Json(state.service.get_snapshot(&course).await?))
}

async fn record_payment(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(course): Path<String>,
    headers: HeaderMap,
    body: Result<Json<PaymentBody>, JsonRejection>,
) -> Result<(StatusCode, Json<PaymentOutcome>), AppError> {
    let req = extract_validated_json(body)?;
    let course = CourseId::derive(&course)?;
    let key = idempotency_key(req.idempotency_key, &headers)
        .ok_or_else(|| AppError::Validation("idempotency key is required".into()))?;

    let outcome = state
        .service
        .record_payment(
            &ctx,
            &course,
            PaymentRequest {
                gross_amount: req.gross_amount,
                idempotency_key: key,
                signals: PaymentSignals {
                    watch_met: req.watch_met,
                    rating_tenths: req.rating_tenths,
                    commented: req.commented,
                    watched_at: req.watched_at,
                },
            },
        )
        .await?;
    let status = if outcome.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

async fn evaluate_engagement(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(course): Path<String>,
) -> Result<Json<EngagementReport>, AppError> {
    let course = CourseId::derive(&course)?;
    Ok(Json(state.service.evaluate_engagement(&ctx, &course).await?))
}

async fn withdraw(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(course): Path<String>,
    headers: HeaderMap,
    body: Result<Json<WithdrawBody>, JsonRejection>,
) -> Result<Json<WithdrawOutcome>, AppError> {
    let req = extract_validated_json(body)?;
    let course = CourseId::derive(&course)?;
    let key = idempotency_key(req.idempotency_key, &headers);
    let outcome = state
        .service
        .withdraw(&ctx, &course, req.tranche, key.as_deref())
        .await?;
    Ok(Json(outcome))
}

async fn file_dispute(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(course): Path<String>,
    body: Result<Json<DisputeBody>, JsonRejection>,
) -> Result<(StatusCode, Json<DisputeOutcome>), AppError> {
    let req = extract_validated_json(body)?;
    let course = CourseId::derive(&course)?;
    let outcome = state
        .service
        .file_dispute(&ctx, &course, &req.reason)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn resolve_dispute(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(course): Path<String>,
    body: Result<Json<ResolveBody>, JsonRejection>,
) -> Result<Json<ResolutionOutcome>, AppError> {
    let req = extract_validated_json(body)?;
    let course = CourseId::derive(&course)?;
    let outcome = state
        .service
        .resolve_dispute(&ctx, &course, req.action)
        .await?;
    Ok(Json(outcome))
}

/// Body field first, then the `Idempotency-Key` header.
fn idempotency_key(from_body: Option<String>, headers: &HeaderMap) -> Option<String> {
    from_body
        .filter(|k| !k.trim().is_empty())
        .or_else(|| {
            headers
                .get(IDEMPOTENCY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_key_wins_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_HEADER, "from-header".parse().unwrap());
        assert_eq!(
            idempotency_key(Some("from-body".into()), &headers).as_deref(),
            Some("from-body")
        );
        assert_eq!(
            idempotency_key(None, &headers).as_deref(),
            Some("from-header")
        );
        assert_eq!(idempotency_key(Some(" ".into()), &HeaderMap::new()), None);
    }

    #[test]
    fn create_body_rejects_same_payee_and_oracle() {
        let body = CreateAccountBody {
            human_course_id: "rust-101".into(),
            payee_user_id: "author".into(),
            oracle_user_id: "author".into(),
            script_ref: None,
        };
        assert!(body.validate().is_err());
    }
}

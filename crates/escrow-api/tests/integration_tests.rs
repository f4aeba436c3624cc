//! # Integration Tests for escrow-api
//!
//! Drives the router with `oneshot` requests over a fully in-memory state:
//! health probes, caller identification, the payment-to-withdrawal flow,
//! idempotent replays and the error body format.

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use escrow_api::AppState;
use escrow_core::{CourseId, IdentityHandle, UserId};
use escrow_settlement::InMemoryDirectory;

const COURSE: &str = "rust-101";

/// Helper: app with an author, an oracle and five enrolled learners.
fn test_app() -> axum::Router {
    let directory = InMemoryDirectory::new();
    let course = CourseId::derive(COURSE).unwrap();
    for (user, identity) in [("author", "addr_author"), ("oracle", "addr_oracle")] {
        directory.set_payout_identity(
            UserId::new(user).unwrap(),
            IdentityHandle::new(identity).unwrap(),
        );
    }
    for i in 1..=5 {
        let user = UserId::new(format!("learner-{i}")).unwrap();
        directory.enroll(course, user.clone());
        directory.set_payout_identity(user, IdentityHandle::new(format!("addr_l{i}")).unwrap());
    }
    directory.set_watch_seconds(course, 3_900);
    directory.set_course_duration(course, 1_200);
    escrow_api::app(AppState::in_memory(directory))
}

fn get(uri: &str, caller: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(caller) = caller {
        builder = builder.header("x-caller-id", caller);
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, caller: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-caller-id", caller)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn open_account(app: &axum::Router) {
    let response = app
        .clone()
        .oneshot(post(
            "/v1/escrow/accounts",
            "author",
            json!({
                "human_course_id": COURSE,
                "payee_user_id": "author",
                "oracle_user_id": "oracle",
                "script_ref": "addr_script_v1"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

fn payment_body(key: &str) -> Value {
    json!({
        "gross_amount": 10_000_000u64,
        "idempotency_key": key,
        "watch_met": true,
        "rating_tenths": 45,
        "commented": true,
        "watched_at": "2100-01-01T00:00:00Z"
    })
}

async fn pay_five(app: &axum::Router) -> Value {
    let mut last = Value::Null;
    for i in 1..=5 {
        let response = app
            .clone()
            .oneshot(post(
                &format!("/v1/escrow/accounts/{COURSE}/payments"),
                &format!("learner-{i}"),
                payment_body(&format!("chk-{i}")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        last = body_json(response).await;
    }
    last
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn test_liveness_probe() {
    let response = test_app()
        .oneshot(get("/health/liveness", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");
}

#[tokio::test]
async fn test_readiness_probe_without_database() {
    let response = test_app()
        .oneshot(get("/health/readiness", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ready");
}

// -- Caller identification ----------------------------------------------------

#[tokio::test]
async fn test_missing_caller_header_is_401() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/v1/escrow/accounts/{COURSE}/disputes"))
                .header("content-type", "application/json")
                .body(Body::from(json!({"reason": "x"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
    assert_eq!(body["error"]["retryable"], false);
}

// -- Escrow lifecycle ---------------------------------------------------------

#[tokio::test]
async fn test_payments_release_enrollment_tranche() {
    let app = test_app();
    open_account(&app).await;
    let fifth = pay_five(&app).await;

    assert_eq!(fifth["fee"], 700_000);
    assert_eq!(fifth["net_amount"], 9_300_000);
    assert_eq!(fifth["payout"], 13_950_000);
    assert_eq!(fifth["snapshot"]["record"]["locked"], 32_550_000);
    assert_eq!(fifth["snapshot"]["record"]["tranche30_released"], true);

    let response = app
        .clone()
        .oneshot(get(&format!("/v1/escrow/accounts/{COURSE}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    assert_eq!(snapshot["ledger_version"], 6);
    assert_eq!(snapshot["stale"], false);
    assert_eq!(snapshot["record"]["status"], "PENDING");
}

#[tokio::test]
async fn test_replayed_payment_is_flagged_duplicate() {
    let app = test_app();
    open_account(&app).await;
    let uri = format!("/v1/escrow/accounts/{COURSE}/payments");

    let first = app
        .clone()
        .oneshot(post(&uri, "learner-1", payment_body("chk-1")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let replay = app
        .clone()
        .oneshot(post(&uri, "learner-1", payment_body("chk-1")))
        .await
        .unwrap();
    assert_eq!(replay.status(), StatusCode::OK);
    let body = body_json(replay).await;
    assert_eq!(body["duplicate"], true);
    assert_eq!(body["snapshot"]["record"]["paid_count"], 1);
}

#[tokio::test]
async fn test_idempotency_key_from_header() {
    let app = test_app();
    open_account(&app).await;
    let mut body = payment_body("unused");
    body.as_object_mut().unwrap().remove("idempotency_key");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/v1/escrow/accounts/{COURSE}/payments"))
                .header("content-type", "application/json")
                .header("x-caller-id", "learner-1")
                .header("idempotency-key", "hdr-1")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_payment_without_key_is_rejected() {
    let app = test_app();
    open_account(&app).await;
    let mut body = payment_body("unused");
    body.as_object_mut().unwrap().remove("idempotency_key");

    let response = app
        .oneshot(post(
            &format!("/v1/escrow/accounts/{COURSE}/payments"),
            "learner-1",
            body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_engagement_and_metrics_withdrawal() {
    let app = test_app();
    open_account(&app).await;
    pay_five(&app).await;

    let response = app
        .clone()
        .oneshot(get(
            &format!("/v1/escrow/accounts/{COURSE}/engagement"),
            Some("learner-3"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["avg_watch_bps"], 6_500);
    assert_eq!(report["eligible"], true);

    let response = app
        .clone()
        .oneshot(post(
            &format!("/v1/escrow/accounts/{COURSE}/withdrawals"),
            "author",
            json!({"tranche": "metrics40"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["payout"], 13_020_000);
    assert_eq!(outcome["snapshot"]["record"]["locked"], 19_530_000);

    // Watched in 2100: the dispute window is still open.
    let response = app
        .clone()
        .oneshot(post(
            &format!("/v1/escrow/accounts/{COURSE}/withdrawals"),
            "author",
            json!({"tranche": "final"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "WINDOW_NOT_ELAPSED");
    assert_eq!(body["error"]["retryable"], false);
}

#[tokio::test]
async fn test_learner_cannot_withdraw() {
    let app = test_app();
    open_account(&app).await;
    pay_five(&app).await;

    let response = app
        .oneshot(post(
            &format!("/v1/escrow/accounts/{COURSE}/withdrawals"),
            "learner-1",
            json!({"tranche": "metrics40"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_dispute_then_refund() {
    let app = test_app();
    open_account(&app).await;
    pay_five(&app).await;

    let response = app
        .clone()
        .oneshot(post(
            &format!("/v1/escrow/accounts/{COURSE}/disputes"),
            "learner-2",
            json!({"reason": "lectures missing"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        body_json(response).await["snapshot"]["record"]["status"],
        "DISPUTED"
    );

    let response = app
        .clone()
        .oneshot(post(
            &format!("/v1/escrow/accounts/{COURSE}/disputes/resolve"),
            "oracle",
            json!({"action": "refund"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["payout"], 32_550_000);
    assert_eq!(body["refund"]["shares"].as_array().unwrap().len(), 5);
    assert_eq!(body["snapshot"]["record"]["status"], "REFUNDED");
}

// -- Errors -------------------------------------------------------------------

#[tokio::test]
async fn test_unknown_course_is_404() {
    let response = test_app()
        .oneshot(get("/v1/escrow/accounts/no-such-course", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_duplicate_account_is_409() {
    let app = test_app();
    open_account(&app).await;
    let response = app
        .oneshot(post(
            "/v1/escrow/accounts",
            "author",
            json!({
                "human_course_id": COURSE,
                "payee_user_id": "author",
                "oracle_user_id": "oracle"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "ALREADY_EXISTS");
}

#[tokio::test]
async fn test_malformed_body_is_422() {
    let response = test_app()
        .oneshot(post(
            "/v1/escrow/accounts",
            "author",
            json!({"human_course_id": COURSE, "unexpected": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"]["code"], "BAD_REQUEST");
}

//! Daemon-level scenario tests: compose `routes::build_router` directly and
//! drive it with `tower::ServiceExt::oneshot`.
//!
//! These exercise the routes whose backing tables (`plan_variants`,
//! `checkout_idempotency`, `webhook_events`) are owned by this crate's own
//! migration. `GET /f/:form_id/schema` and `POST /f/:form_id/submit` call
//! opaque RPCs whose function bodies live outside this crate's schema and
//! are not exercised here; their pure pre-DB validation is covered in
//! `gatekit-contract`/`gatekit-logic`/`gatekit-validate`'s own test suites.
//!
//! DB-backed, skipped as a whole if GATEKIT_DATABASE_URL is not set.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;

use gatekit_billing::fake::FakeBillingClient;
use gatekit_config::{secrets::Secret, AppConfig};
use gatekit_daemon::auth::fake::FakeAuthClient;
use gatekit_daemon::{routes, state::AppState};

const SIGNING_SECRET: &str = "whsec_test_secret";
const INTERNAL_TOKEN: &str = "test-internal-token";

fn test_config() -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".into(),
        database_url: Secret::new("postgres://unused".into()),
        supabase_url: "https://example.supabase.co".into(),
        supabase_anon_key: Secret::new("anon".into()),
        supabase_service_role_key: Secret::new("service".into()),
        stripe_secret_key: Secret::new("sk_test".into()),
        stripe_webhook_signing_secret: Secret::new(SIGNING_SECRET.into()),
        checkout_success_url: "https://app.example.com/billing/success".into(),
        checkout_cancel_url: "https://app.example.com/billing/cancel".into(),
        billing_portal_return_url: "https://app.example.com/billing".into(),
        contact_sales_url: "https://example.com/contact-sales".into(),
        plan_upgrade_url: "https://example.com/pricing".into(),
        billing_grace_days: 7,
        stripe_webhook_claim_ttl_seconds: 300,
        stripe_webhook_max_body_bytes: 262_144,
        stripe_retry_batch_size: 200,
        stripe_grace_batch_size: 500,
        stripe_catalog_sync_enabled: true,
        stripe_catalog_sync_cron: "*/15 * * * *".into(),
        stripe_catalog_env: None,
        stripe_internal_admin_token: Some(Secret::new(INTERNAL_TOKEN.into())),
        request_timeout: std::time::Duration::from_secs(10),
    }
}

async fn connect_or_skip() -> Option<sqlx::PgPool> {
    let url = match std::env::var(gatekit_db::ENV_DATABASE_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: GATEKIT_DATABASE_URL not set");
            return None;
        }
    };
    let pool = gatekit_db::connect(&url).await.expect("connect");
    gatekit_db::migrate(&pool).await.expect("migrate");
    Some(pool)
}

async fn call(router: axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let bytes = resp.into_body().collect().await.expect("body collect failed").to_bytes();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("body is not valid JSON") };
    (status, json)
}

fn sign_webhook(body: &[u8]) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let mut signed_payload = timestamp.to_string().into_bytes();
    signed_payload.push(b'.');
    signed_payload.extend_from_slice(body);
    let mut mac = Hmac::<Sha256>::new_from_slice(SIGNING_SECRET.as_bytes()).unwrap();
    mac.update(&signed_payload);
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("t={timestamp},v1={signature}")
}

#[tokio::test]
async fn healthz_and_readyz_report_ok() {
    let Some(pool) = connect_or_skip().await else { return };

    let billing = Arc::new(FakeBillingClient::new());
    let auth = Arc::new(FakeAuthClient::new());
    let state = AppState::new(pool, test_config(), billing, auth);

    let (status, body) = call(
        routes::build_router(state.clone()),
        Request::builder().method("GET").uri("/api/v1/healthz").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["service"], "gatekit-daemon");

    let (status, body) = call(
        routes::build_router(state),
        Request::builder().method("GET").uri("/api/v1/readyz").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

/// A caller with no bearer token at all must be rejected before the handler
/// ever reaches the database (spec §6.1 "auth is a bearer token validated
/// by an external collaborator").
#[tokio::test]
async fn checkout_session_without_bearer_token_is_unauthorized() {
    let Some(pool) = connect_or_skip().await else { return };

    let billing = Arc::new(FakeBillingClient::new());
    let auth = Arc::new(FakeAuthClient::new());
    let state = AppState::new(pool, test_config(), billing, auth);
    let workspace_id = Uuid::new_v4();

    let req = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/stripe/workspaces/{workspace_id}/checkout-session"))
        .header("content-type", "application/json")
        .header("idempotency-key", Uuid::new_v4().to_string())
        .body(Body::from(json!({"plan_slug": "pro", "interval": "monthly"}).to_string()))
        .unwrap();
    let (status, _) = call(routes::build_router(state), req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

/// `plan_slug: "free"` is never a valid checkout target (spec §4.5 edge
/// case: "free" and "enterprise" are rejected before the idempotency ledger
/// is touched).
#[tokio::test]
async fn checkout_session_rejects_free_plan() {
    let Some(pool) = connect_or_skip().await else { return };

    let billing = Arc::new(FakeBillingClient::new());
    let auth = Arc::new(FakeAuthClient::new());
    let user_id = Uuid::new_v4();
    let workspace_id = Uuid::new_v4();
    auth.seed_user("token-a", user_id);
    auth.seed_admin(user_id, workspace_id);
    let state = AppState::new(pool, test_config(), billing, auth);

    let req = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/stripe/workspaces/{workspace_id}/checkout-session"))
        .header("content-type", "application/json")
        .header("authorization", "Bearer token-a")
        .header("idempotency-key", Uuid::new_v4().to_string())
        .body(Body::from(json!({"plan_slug": "free", "interval": "monthly"}).to_string()))
        .unwrap();
    let (status, _) = call(routes::build_router(state), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Happy path: an authorized admin with an active catalog variant gets back
/// a checkout session url, and replaying the same idempotency key returns
/// the same session without creating a second upstream session.
#[tokio::test]
async fn checkout_session_happy_path_then_idempotent_replay() {
    let Some(pool) = connect_or_skip().await else { return };

    gatekit_db::catalog::upsert(
        &pool,
        gatekit_schemas::PlanSlug::Pro,
        gatekit_schemas::BillingInterval::Monthly,
        "usd",
        &format!("price_pro_monthly_{}", Uuid::new_v4()),
        2900,
        0,
    )
    .await
    .expect("seed plan variant");

    let billing = Arc::new(FakeBillingClient::new());
    let auth = Arc::new(FakeAuthClient::new());
    let user_id = Uuid::new_v4();
    let workspace_id = Uuid::new_v4();
    auth.seed_user("token-a", user_id);
    auth.seed_admin(user_id, workspace_id);
    let state = AppState::new(pool, test_config(), billing, auth);

    let idempotency_key = Uuid::new_v4().to_string();
    let build_request = || {
        Request::builder()
            .method("POST")
            .uri(format!("/api/v1/stripe/workspaces/{workspace_id}/checkout-session"))
            .header("content-type", "application/json")
            .header("authorization", "Bearer token-a")
            .header("idempotency-key", &idempotency_key)
            .body(Body::from(json!({"plan_slug": "pro", "interval": "monthly"}).to_string()))
            .unwrap()
    };

    let (status, first_body) = call(routes::build_router(state.clone()), build_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first_body["destination"], "checkout");
    assert_eq!(first_body["idempotent_replay"], false);
    let session_id = first_body["session_id"].as_str().unwrap().to_string();

    let (status, replay_body) = call(routes::build_router(state), build_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay_body["idempotent_replay"], true);
    assert_eq!(replay_body["session_id"], session_id);
}

/// Catalog-sync trigger requires the internal admin token.
#[tokio::test]
async fn catalog_sync_requires_internal_token() {
    let Some(pool) = connect_or_skip().await else { return };

    let billing = Arc::new(FakeBillingClient::new());
    let auth = Arc::new(FakeAuthClient::new());
    let state = AppState::new(pool, test_config(), billing, auth);

    let (status, _) = call(
        routes::build_router(state.clone()),
        Request::builder().method("POST").uri("/api/v1/stripe/catalog/sync").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        routes::build_router(state),
        Request::builder()
            .method("POST")
            .uri("/api/v1/stripe/catalog/sync")
            .header("x-internal-admin-token", INTERNAL_TOKEN)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["scanned_prices"].is_number());
}

/// A freshly delivered webhook is accepted and a replay of the exact same
/// event id is reported as a duplicate (spec §4.7).
#[tokio::test]
async fn stripe_webhook_ingests_then_dedupes_replay() {
    let Some(pool) = connect_or_skip().await else { return };

    let billing = Arc::new(FakeBillingClient::new());
    let auth = Arc::new(FakeAuthClient::new());
    let state = AppState::new(pool, test_config(), billing, auth);

    let event_id = format!("evt_{}", Uuid::new_v4());
    let payload = json!({
        "id": event_id,
        "type": "customer.subscription.updated",
        "data": {"object": {}},
    })
    .to_string();
    let signature = sign_webhook(payload.as_bytes());

    let build_request = || {
        Request::builder()
            .method("POST")
            .uri("/api/v1/stripe/webhook")
            .header("content-type", "application/json")
            .header("stripe-signature", &signature)
            .body(Body::from(payload.clone()))
            .unwrap()
    };

    let (status, body) = call(routes::build_router(state.clone()), build_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert!(body["duplicate"].is_null());

    let (status, body) = call(routes::build_router(state), build_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["duplicate"], true);
}

/// A webhook request with no `stripe-signature` header at all is rejected
/// before the body is ever parsed or inserted.
#[tokio::test]
async fn stripe_webhook_without_signature_header_is_rejected() {
    let Some(pool) = connect_or_skip().await else { return };

    let billing = Arc::new(FakeBillingClient::new());
    let auth = Arc::new(FakeAuthClient::new());
    let state = AppState::new(pool, test_config(), billing, auth);

    let payload = json!({"id": "evt_no_sig", "type": "customer.subscription.updated"}).to_string();
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/stripe/webhook")
        .header("content-type", "application/json")
        .body(Body::from(payload))
        .unwrap();
    let (status, _) = call(routes::build_router(state), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// An oversized body is rejected with 413 on size alone, even when it is
/// not valid JSON. The size guard must run ahead of any parse attempt
/// (spec §4.7 step 2), so a body this big never reaches `serde_json::from_slice`.
#[tokio::test]
async fn stripe_webhook_oversized_non_json_body_is_413_not_400() {
    let Some(pool) = connect_or_skip().await else { return };

    let billing = Arc::new(FakeBillingClient::new());
    let auth = Arc::new(FakeAuthClient::new());
    let mut config = test_config();
    config.stripe_webhook_max_body_bytes = 16;
    let state = AppState::new(pool, config, billing, auth);

    let oversized_garbage = vec![b'x'; 64];
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/stripe/webhook")
        .header("content-type", "application/json")
        .header("stripe-signature", sign_webhook(&oversized_garbage))
        .body(Body::from(oversized_garbage))
        .unwrap();
    let (status, _) = call(routes::build_router(state), req).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

/// A body that passes the size guard and carries a validly-signed but
/// non-JSON payload is rejected as malformed only after signature
/// verification succeeds.
#[tokio::test]
async fn stripe_webhook_valid_signature_but_non_json_body_is_malformed() {
    let Some(pool) = connect_or_skip().await else { return };

    let billing = Arc::new(FakeBillingClient::new());
    let auth = Arc::new(FakeAuthClient::new());
    let state = AppState::new(pool, test_config(), billing, auth);

    let body = b"not json".to_vec();
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/stripe/webhook")
        .header("content-type", "application/json")
        .header("stripe-signature", sign_webhook(&body))
        .body(Body::from(body))
        .unwrap();
    let (status, _) = call(routes::build_router(state), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

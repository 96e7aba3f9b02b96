//! Axum router and all HTTP handlers for gatekit-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so daemon-level tests
//! can compose the router directly with `tower::ServiceExt::oneshot`.

use std::net::IpAddr;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use uuid::Uuid;

use gatekit_schemas::{BillingInterval, PlanSlug, RequestContext};

use crate::api_types::{
    CatalogSyncResponseBody, CheckoutSessionRequestBody, CheckoutSessionResponseBody, FormSchemaOut,
    FormSchemaResponseBody, HealthResponseBody, PortalSessionResponseBody, ReadyResponseBody,
    SubmitRequestBody, SubmitResponseBody, WebhookIngestResponseBody,
};
use crate::error::{ApiError, FieldIssueOut};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing, body-size limit) are **not** applied
/// here; `main.rs` attaches them after this call so tests can use the bare
/// router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/healthz", get(healthz))
        .route("/api/v1/readyz", get(readyz))
        .route("/api/v1/f/:form_id/schema", get(get_form_schema))
        .route("/api/v1/f/:form_id/submit", post(submit_form))
        .route(
            "/api/v1/stripe/workspaces/:workspace_id/checkout-session",
            post(create_checkout_session),
        )
        .route(
            "/api/v1/stripe/workspaces/:workspace_id/portal-session",
            post(create_portal_session),
        )
        .route("/api/v1/stripe/webhook", post(stripe_webhook))
        .route("/api/v1/stripe/catalog/sync", post(catalog_sync))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /api/v1/healthz, GET /api/v1/readyz
// ---------------------------------------------------------------------------

pub(crate) async fn healthz(State(st): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponseBody {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

pub(crate) async fn readyz(State(st): State<AppState>) -> impl IntoResponse {
    let ready = gatekit_db::ping(&st.pool).await.is_ok();
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(ReadyResponseBody { ready }))
}

// ---------------------------------------------------------------------------
// GET /api/v1/f/:form_id/schema
// ---------------------------------------------------------------------------

pub(crate) async fn get_form_schema(
    State(st): State<AppState>,
    Path(form_id): Path<String>,
) -> Result<Response, ApiError> {
    let form_id = parse_uuid_path(&form_id, "form_id")?;

    let form = gatekit_db::rpc::get_published_form_by_id(&st.pool, form_id)
        .await
        .map_err(|e| backend_error(e, "loading form schema"))?;

    let body = FormSchemaResponseBody {
        form: FormSchemaOut {
            id: form.id,
            title: form.title,
            description: form.description,
            published_schema: form.published_schema,
            success_message: form.success_message,
            redirect_url: form.redirect_url,
            meta_title: form.meta_title,
            meta_description: form.meta_description,
            meta_image_url: form.meta_image_url,
            captcha_enabled: form.captcha_enabled,
            captcha_provider: form.captcha_provider,
            require_auth: form.require_auth,
            password_protected: form.password_protected,
        },
    };
    Ok((StatusCode::OK, Json(body)).into_response())
}

// ---------------------------------------------------------------------------
// POST /api/v1/f/:form_id/submit
// ---------------------------------------------------------------------------

pub(crate) async fn submit_form(
    State(st): State<AppState>,
    Path(form_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let form_id = parse_uuid_path(&form_id, "form_id")?;
    let idempotency_key = parse_idempotency_header(&headers)?;
    let request: SubmitRequestBody = serde_json::from_slice(&body).map_err(|e| {
        ApiError::FieldValidationFailed {
            issues: vec![FieldIssueOut { field_id: "body".into(), message: e.to_string() }],
        }
    })?;

    let ctx = request_context(&headers);

    // Step 2: anonymous rate-limit gate.
    gatekit_db::rpc::check_request(&st.pool, ctx.client_ip.as_deref(), ctx.user_agent.as_deref(), ctx.referer.as_deref())
        .await
        .map_err(|e| match e {
            gatekit_db::DbError::RateLimited => ApiError::RateLimited,
            _ => ApiError::RateLimitCheckFailed,
        })?;

    // Step 3: load the published form.
    let form = match gatekit_db::rpc::get_published_form_by_id(&st.pool, form_id).await {
        Ok(form) => form,
        Err(gatekit_db::DbError::NotFound) => return Err(ApiError::NotFound),
        Err(_) => return Err(ApiError::RunnerInternalError),
    };

    // Step 4: parse the contract.
    let contract = gatekit_contract::parse_contract(&form.published_schema)
        .map_err(|gatekit_contract::ContractError::UnsupportedFormSchema(issues)| {
            ApiError::UnsupportedFormSchema { issues }
        })?;

    // Step 5: sanitize — compute visibility, drop hidden keys, reject unknown ones.
    let visibility = gatekit_logic::compute_visibility(&contract, &request.data);
    let outcome = gatekit_logic::sanitize_submission(&contract, &visibility, &request.data);
    if !outcome.unknown_fields.is_empty() {
        return Err(ApiError::UnknownFields { unknown_fields: outcome.unknown_fields });
    }

    // Step 6: validate visible values.
    gatekit_validate::validate_submission(&contract, &visibility, &outcome.sanitized).map_err(
        |gatekit_validate::ValidationError::FieldValidationFailed(issues)| ApiError::FieldValuesInvalid {
            issues: issues.iter().map(FieldIssueOut::from).collect(),
        },
    )?;

    // Step 7: quota check.
    let quota = gatekit_db::rpc::get_form_submission_quota(&st.pool, form_id)
        .await
        .map_err(|_| ApiError::RunnerInternalError)?;
    if !quota.is_enabled {
        return Err(ApiError::PlanFeatureDisabled {
            feature: quota.feature_key,
            current: quota.current_usage,
            allowed: quota.limit_value,
            upgrade_url: st.config.plan_upgrade_url.clone(),
        });
    }
    if quota.limit_value >= 0 && quota.current_usage >= quota.limit_value {
        return Err(ApiError::PlanLimitExceeded {
            feature: quota.feature_key,
            current: quota.current_usage,
            allowed: quota.limit_value,
            upgrade_url: st.config.plan_upgrade_url.clone(),
        });
    }

    // Step 8: persist.
    let submission_id = match gatekit_db::rpc::submit_form(
        &st.pool,
        form_id,
        &Value::Object(outcome.sanitized),
        idempotency_key,
        ctx.client_ip.as_deref(),
        ctx.user_agent.as_deref(),
        ctx.referer.as_deref(),
        request.started_at,
    )
    .await
    {
        Ok(id) => id,
        Err((gatekit_db::rpc::SubmitFormError::FormNotFound, _)) => return Err(ApiError::NotFound),
        Err((gatekit_db::rpc::SubmitFormError::Forbidden, _)) => return Err(ApiError::Forbidden),
        Err((gatekit_db::rpc::SubmitFormError::StateConflict, _)) => return Err(ApiError::FormStateConflict),
        Err((gatekit_db::rpc::SubmitFormError::Other, _)) => return Err(ApiError::RunnerInternalError),
    };

    // Step 9.
    Ok((
        StatusCode::CREATED,
        Json(SubmitResponseBody {
            submission_id,
            success_message: form.success_message,
            redirect_url: form.redirect_url,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// POST /api/v1/stripe/workspaces/:workspace_id/checkout-session
// ---------------------------------------------------------------------------

pub(crate) async fn create_checkout_session(
    State(st): State<AppState>,
    Path(workspace_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let workspace_id = parse_uuid_path(&workspace_id, "workspace_id")?;
    let actor = authorize(&st, &headers, workspace_id).await?;
    let idempotency_key = parse_idempotency_header(&headers)?;

    let request: CheckoutSessionRequestBody = serde_json::from_slice(&body).map_err(|e| {
        ApiError::FieldValidationFailed {
            issues: vec![FieldIssueOut { field_id: "body".into(), message: e.to_string() }],
        }
    })?;

    let plan_slug = PlanSlug::parse(&request.plan_slug).ok_or_else(|| ApiError::FieldValidationFailed {
        issues: vec![FieldIssueOut { field_id: "plan_slug".into(), message: "must be one of free, pro, business, enterprise".into() }],
    })?;
    let interval = BillingInterval::parse(&request.interval).ok_or_else(|| ApiError::FieldValidationFailed {
        issues: vec![FieldIssueOut { field_id: "interval".into(), message: "must be monthly or yearly".into() }],
    })?;

    match plan_slug {
        PlanSlug::Free => return Err(ApiError::InvalidPlanForCheckout),
        PlanSlug::Enterprise => return Err(ApiError::ContactSalesRequired),
        PlanSlug::Pro | PlanSlug::Business => {}
    }

    let correlation_id = Uuid::new_v4();

    let mut variant = gatekit_db::catalog::find_active(&st.pool, plan_slug, interval)
        .await
        .map_err(|e| backend_error(e, "loading plan variant"))?;
    if variant.is_none() {
        // Force a re-sync once before giving up — the catalog may simply be stale.
        let _ = gatekit_billing::catalog::sync_catalog(&st.pool, st.billing.as_ref(), st.config.stripe_catalog_env.as_deref()).await;
        variant = gatekit_db::catalog::find_active(&st.pool, plan_slug, interval)
            .await
            .map_err(|e| backend_error(e, "loading plan variant after resync"))?;
    }
    let Some(variant) = variant else {
        return Err(ApiError::CatalogOutOfSync);
    };
    if variant.upstream_price_id.trim().is_empty() {
        return Err(ApiError::BillingConfigMissing { correlation_id });
    }

    // Already entitled on this exact plan: send the caller to the portal
    // instead of running them through the checkout idempotency ledger again.
    if let Some(existing) = gatekit_db::subscriptions::find_latest_entitled_for_workspace(&st.pool, workspace_id)
        .await
        .map_err(|e| backend_error(e, "loading existing subscription"))?
    {
        if existing.plan == plan_slug {
            let (customer_id, _) = gatekit_billing::customers::resolve_or_create(&st.pool, st.billing.as_ref(), workspace_id, "portal")
                .await
                .map_err(|_| ApiError::StripePortalSessionFailed { correlation_id })?;
            let session = st
                .billing
                .create_portal_session(&customer_id, &st.config.billing_portal_return_url)
                .await
                .map_err(|_| ApiError::StripePortalSessionFailed { correlation_id })?;
            return Ok((
                StatusCode::OK,
                Json(CheckoutSessionResponseBody {
                    url: session.url,
                    session_id: session.id,
                    destination: "portal".into(),
                    reason: Some("workspace is already subscribed to this plan".into()),
                    idempotent_replay: None,
                }),
            )
                .into_response());
        }
    }

    let decision = gatekit_billing::checkout::begin_checkout(&st.pool, workspace_id, idempotency_key, variant.id, Some(actor.user_id))
        .await
        .map_err(|e| backend_error(e, "evaluating checkout idempotency"))?;

    match decision {
        gatekit_billing::checkout::CheckoutDecision::Proceed { upstream_idempotency_key } => {
            let billing = st.billing.clone();
            let success_url = st.config.checkout_success_url.clone();
            let cancel_url = st.config.checkout_cancel_url.clone();
            let price_id = variant.upstream_price_id.clone();
            let variant_id = variant.id;
            let result = gatekit_billing::customers::with_recovered_customer(
                &st.pool,
                st.billing.as_ref(),
                workspace_id,
                "checkout",
                correlation_id,
                None,
                move |customer_id| {
                    let billing = billing.clone();
                    let upstream_idempotency_key = upstream_idempotency_key.clone();
                    let success_url = success_url.clone();
                    let cancel_url = cancel_url.clone();
                    let price_id = price_id.clone();
                    async move {
                        billing
                            .create_checkout_session(gatekit_billing::client::CheckoutSessionRequest {
                                idempotency_key: upstream_idempotency_key,
                                customer_id,
                                price_id,
                                success_url,
                                cancel_url,
                                client_reference_id: workspace_id.to_string(),
                                metadata: json!({
                                    "workspace_id": workspace_id.to_string(),
                                    "plan_variant_id": variant_id.to_string(),
                                }),
                            })
                            .await
                    }
                },
            )
            .await;

            match result {
                Ok(session) => {
                    gatekit_billing::checkout::complete_checkout(&st.pool, workspace_id, idempotency_key, &session.id, &session.url)
                        .await
                        .map_err(|e| backend_error(e, "recording completed checkout"))?;
                    Ok((
                        StatusCode::OK,
                        Json(CheckoutSessionResponseBody {
                            url: session.url,
                            session_id: session.id,
                            destination: "checkout".into(),
                            reason: None,
                            idempotent_replay: Some(false),
                        }),
                    )
                        .into_response())
                }
                Err(e) => {
                    let _ = gatekit_billing::checkout::fail_checkout(&st.pool, workspace_id, idempotency_key, &e.to_string()).await;
                    Err(ApiError::StripeCheckoutSessionFailed { correlation_id })
                }
            }
        }
        gatekit_billing::checkout::CheckoutDecision::ReplayCompleted { session_id, session_url } => Ok((
            StatusCode::OK,
            Json(CheckoutSessionResponseBody {
                url: session_url,
                session_id,
                destination: "checkout".into(),
                reason: None,
                idempotent_replay: Some(true),
            }),
        )
            .into_response()),
        gatekit_billing::checkout::CheckoutDecision::InProgress => Err(ApiError::CheckoutInProgress),
        gatekit_billing::checkout::CheckoutDecision::ReusedWithDifferentPayload => {
            Err(ApiError::IdempotencyKeyReusedWithDifferentPayload)
        }
        gatekit_billing::checkout::CheckoutDecision::Expired => Err(ApiError::IdempotencyKeyExpired),
    }
}

// ---------------------------------------------------------------------------
// POST /api/v1/stripe/workspaces/:workspace_id/portal-session
// ---------------------------------------------------------------------------

pub(crate) async fn create_portal_session(
    State(st): State<AppState>,
    Path(workspace_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let workspace_id = parse_uuid_path(&workspace_id, "workspace_id")?;
    authorize(&st, &headers, workspace_id).await?;
    let correlation_id = Uuid::new_v4();

    let (customer_id, _) = gatekit_billing::customers::resolve_or_create(&st.pool, st.billing.as_ref(), workspace_id, "portal")
        .await
        .map_err(|_| ApiError::StripePortalSessionFailed { correlation_id })?;

    let session = st
        .billing
        .create_portal_session(&customer_id, &st.config.billing_portal_return_url)
        .await
        .map_err(|_| ApiError::StripePortalSessionFailed { correlation_id })?;

    Ok((StatusCode::OK, Json(PortalSessionResponseBody { url: session.url })).into_response())
}

// ---------------------------------------------------------------------------
// POST /api/v1/stripe/webhook
// ---------------------------------------------------------------------------

pub(crate) async fn stripe_webhook(State(st): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ApiError> {
    let signature_header = headers.get("stripe-signature").and_then(|v| v.to_str().ok());

    // `ingest_event` enforces header-presence -> size -> signature -> parse
    // ordering internally: an oversize or unsigned body is rejected before
    // it is ever run through `serde_json::from_slice`.
    let outcome = gatekit_webhook::ingest_event(
        &st.pool,
        signature_header,
        &body,
        st.config.stripe_webhook_max_body_bytes,
        st.config.stripe_webhook_signing_secret.expose(),
    )
    .await?;

    match outcome {
        gatekit_webhook::IngestOutcome::Accepted { event_id } => {
            let pool = st.pool.clone();
            let billing = st.billing.clone();
            let catalog_env = st.config.stripe_catalog_env.clone();
            let billing_grace_days = st.config.billing_grace_days;
            let ttl_seconds = st.config.stripe_webhook_claim_ttl_seconds;
            let processor_id = format!("gatekit-daemon-{}", std::process::id());
            tokio::spawn(async move {
                if let Err(err) = gatekit_webhook::claim_and_process(
                    &pool,
                    billing.as_ref(),
                    catalog_env.as_deref(),
                    billing_grace_days,
                    event_id,
                    &processor_id,
                    ttl_seconds,
                    gatekit_webhook::DEFAULT_MAX_ATTEMPTS,
                )
                .await
                {
                    tracing::warn!(%event_id, error = %err, "webhook claim attempt failed");
                }
            });
            Ok((StatusCode::OK, Json(WebhookIngestResponseBody { received: true, duplicate: None })).into_response())
        }
        gatekit_webhook::IngestOutcome::Duplicate => {
            Ok((StatusCode::OK, Json(WebhookIngestResponseBody { received: true, duplicate: Some(true) })).into_response())
        }
    }
}

// ---------------------------------------------------------------------------
// POST /api/v1/stripe/catalog/sync
// ---------------------------------------------------------------------------

pub(crate) async fn catalog_sync(State(st): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    authorize_internal_token(&st, &headers)?;

    let correlation_id = Uuid::new_v4();
    let report = gatekit_billing::catalog::sync_catalog(&st.pool, st.billing.as_ref(), st.config.stripe_catalog_env.as_deref())
        .await
        .map_err(|e| {
            tracing::error!(%correlation_id, error = %e, "catalog sync failed");
            ApiError::CatalogSyncFailed { correlation_id }
        })?;

    Ok((
        StatusCode::OK,
        Json(CatalogSyncResponseBody {
            scanned_prices: report.scanned_prices,
            eligible_prices: report.eligible_prices,
            updated_variants: report.updated_variants,
            missing_variants: report.missing_variants,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid_path(raw: &str, field_id: &'static str) -> Result<Uuid, ApiError> {
    raw.parse().map_err(|_| ApiError::FieldValidationFailed {
        issues: vec![FieldIssueOut { field_id: field_id.into(), message: "must be a UUID".into() }],
    })
}

fn parse_idempotency_header(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let raw = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(missing_idempotency_header)?;
    raw.parse().map_err(|_| missing_idempotency_header())
}

fn missing_idempotency_header() -> ApiError {
    ApiError::FieldValidationFailed {
        issues: vec![FieldIssueOut { field_id: "idempotency-key".into(), message: "header must be a UUID".into() }],
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// The first well-formed IPv4/IPv6 address in a comma-separated forwarded-for
/// style header value (spec §4.4 step 2).
fn first_well_formed_ip(raw: &str) -> Option<String> {
    raw.split(',').map(str::trim).find_map(|candidate| candidate.parse::<IpAddr>().ok().map(|ip| ip.to_string()))
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    let client_ip = header_str(headers, "cf-connecting-ip")
        .or_else(|| header_str(headers, "x-forwarded-for"))
        .and_then(first_well_formed_ip);

    RequestContext {
        correlation_id: Uuid::new_v4(),
        client_ip,
        user_agent: header_str(headers, "user-agent").map(str::to_string),
        referer: header_str(headers, "referer").map(str::to_string),
        access_token: bearer_token(headers).map(str::to_string),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, "authorization")?.strip_prefix("Bearer ")
}

async fn authorize(st: &AppState, headers: &HeaderMap, workspace_id: Uuid) -> Result<crate::auth::AuthorizedActor, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    Ok(st.auth.authorize_workspace_admin(token, workspace_id).await?)
}

/// Constant-time comparison of the internal admin token against
/// `x-internal-admin-token` or a bearer `Authorization` header. No timing
/// side-channel should tell a caller how many leading bytes of the token
/// they guessed correctly.
fn authorize_internal_token(st: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = st.config.stripe_internal_admin_token.as_ref() else {
        return Err(ApiError::InternalTokenInvalid);
    };
    let presented = header_str(headers, "x-internal-admin-token").or_else(|| bearer_token(headers));
    let Some(presented) = presented else {
        return Err(ApiError::InternalTokenInvalid);
    };
    if constant_time_eq(expected.expose().as_bytes(), presented.as_bytes()) {
        Ok(())
    } else {
        Err(ApiError::InternalTokenInvalid)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn backend_error(err: gatekit_db::DbError, context: &str) -> ApiError {
    let correlation_id = Uuid::new_v4();
    tracing::error!(%correlation_id, %context, error = %err, "backend call failed");
    ApiError::BackendError { correlation_id }
}

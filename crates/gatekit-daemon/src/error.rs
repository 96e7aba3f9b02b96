//! The error envelope (spec §6.4) and the error taxonomy (spec §7).
//!
//! Every non-2xx response is `{"error": string, "code"?: string, ...context}`.
//! Billing 5xx responses additionally carry a `correlation_id` that is also
//! logged, so an operator can find the failed request from either side.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gatekit_validate::FieldIssue;
use serde_json::{json, Map, Value};
use uuid::Uuid;

#[derive(Debug)]
pub struct FieldIssueOut {
    pub field_id: String,
    pub message: String,
}

impl From<&FieldIssue> for FieldIssueOut {
    fn from(issue: &FieldIssue) -> Self {
        FieldIssueOut {
            field_id: issue.field_id.clone(),
            message: issue.message.clone(),
        }
    }
}

fn issues_json(issues: &[FieldIssueOut]) -> Value {
    Value::Array(
        issues
            .iter()
            .map(|i| json!({ "field_id": i.field_id, "message": i.message }))
            .collect(),
    )
}

/// Everything a handler can fail with, mapped 1:1 onto spec §4.4/§4.5/§4.7/§6.1's
/// status/code table. Handlers construct these directly rather than routing
/// every failure through `anyhow` — the response shape is part of the
/// contract, not an afterthought.
#[derive(Debug)]
pub enum ApiError {
    /// 400, generic client-input fault (bad path param, missing/invalid
    /// `Idempotency-Key`, malformed or unknown-shaped body).
    FieldValidationFailed { issues: Vec<FieldIssueOut> },
    /// 422, schema could not be parsed into a registry (spec §4.1/§4.4 step 4).
    UnsupportedFormSchema { issues: Vec<String> },
    /// 422, a submitted key isn't in the parsed field registry at all.
    UnknownFields { unknown_fields: Vec<String> },
    /// 422, one or more visible fields failed type/shape validation.
    FieldValuesInvalid { issues: Vec<FieldIssueOut> },
    /// 404, form (or other named resource) not found.
    NotFound,
    /// 403, `get_form_submission_quota` reports the feature disabled.
    PlanFeatureDisabled {
        feature: String,
        current: i64,
        allowed: i64,
        upgrade_url: String,
    },
    /// 403, quota limit reached.
    PlanLimitExceeded {
        feature: String,
        current: i64,
        allowed: i64,
        upgrade_url: String,
    },
    /// 403, `submit_form` reported a privilege failure (SQLSTATE 42501).
    Forbidden,
    /// 409, `submit_form` reported a form-state conflict (P0003..P0008).
    FormStateConflict,
    /// 429, the anonymous rate-limit gate tripped.
    RateLimited,
    /// 500, the rate-limit RPC itself could not be evaluated (fail-closed).
    RateLimitCheckFailed,
    /// 500, catch-all for an unexpected submission-pipeline failure.
    RunnerInternalError,

    /// 400, `plan_slug: "free"` is not a checkout target.
    InvalidPlanForCheckout,
    /// 403, `plan_slug: "enterprise"` requires contacting sales.
    ContactSalesRequired,
    /// 409, same idempotency key, different payload, not expired.
    IdempotencyKeyReusedWithDifferentPayload,
    /// 409, same idempotency key, past its 24h expiry.
    IdempotencyKeyExpired,
    /// 409, a concurrent request with the same key/payload is still in flight.
    CheckoutInProgress,
    /// 409, no active plan variant maps to the requested plan/interval even
    /// after a forced catalog re-sync.
    CatalogOutOfSync,
    /// 500, the matched plan variant has no usable upstream price configured.
    BillingConfigMissing { correlation_id: Uuid },
    /// 500, checkout session creation failed upstream (including a failed
    /// customer-recovery retry).
    StripeCheckoutSessionFailed { correlation_id: Uuid },
    /// 500, portal session creation failed upstream.
    StripePortalSessionFailed { correlation_id: Uuid },

    /// 403, missing/invalid bearer token on an authenticated billing route.
    Unauthorized,
    /// 403, missing/invalid internal admin token on `/stripe/catalog/sync`.
    InternalTokenInvalid,

    /// 400, missing `stripe-signature` header or signature verification failed.
    InvalidStripeSignature,
    /// 413, request body exceeds `STRIPE_WEBHOOK_MAX_BODY_BYTES`.
    WebhookBodyTooLarge,
    /// 400, signature verified but the body isn't parseable JSON, or lacks
    /// the `id`/`type` fields Stripe always sends.
    WebhookMalformedPayload,
    /// 500, catch-all for an unexpected webhook-ingestion failure.
    WebhookInternalError,

    /// 500, catalog sync itself failed.
    CatalogSyncFailed { correlation_id: Uuid },

    /// 500, catch-all for a backend failure that isn't part of the named
    /// taxonomy above (schema lookup, auth-collaborator transport errors).
    BackendError { correlation_id: Uuid },
}

impl ApiError {
    fn status(&self) -> StatusCode {
        use ApiError::*;
        match self {
            FieldValidationFailed { .. } => StatusCode::BAD_REQUEST,
            UnsupportedFormSchema { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            UnknownFields { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            FieldValuesInvalid { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            NotFound => StatusCode::NOT_FOUND,
            PlanFeatureDisabled { .. } => StatusCode::FORBIDDEN,
            PlanLimitExceeded { .. } => StatusCode::FORBIDDEN,
            Forbidden => StatusCode::FORBIDDEN,
            FormStateConflict => StatusCode::CONFLICT,
            RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RateLimitCheckFailed => StatusCode::INTERNAL_SERVER_ERROR,
            RunnerInternalError => StatusCode::INTERNAL_SERVER_ERROR,

            InvalidPlanForCheckout => StatusCode::BAD_REQUEST,
            ContactSalesRequired => StatusCode::FORBIDDEN,
            IdempotencyKeyReusedWithDifferentPayload => StatusCode::CONFLICT,
            IdempotencyKeyExpired => StatusCode::CONFLICT,
            CheckoutInProgress => StatusCode::CONFLICT,
            CatalogOutOfSync => StatusCode::CONFLICT,
            BillingConfigMissing { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            StripeCheckoutSessionFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            StripePortalSessionFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,

            Unauthorized => StatusCode::FORBIDDEN,
            InternalTokenInvalid => StatusCode::FORBIDDEN,

            InvalidStripeSignature => StatusCode::BAD_REQUEST,
            WebhookBodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            WebhookMalformedPayload => StatusCode::BAD_REQUEST,
            WebhookInternalError => StatusCode::INTERNAL_SERVER_ERROR,

            CatalogSyncFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,

            BackendError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        use ApiError::*;
        let mut map = Map::new();

        match self {
            FieldValidationFailed { issues } => {
                map.insert("error".into(), json!("Field validation failed"));
                map.insert("code".into(), json!("FIELD_VALIDATION_FAILED"));
                map.insert("issues".into(), issues_json(issues));
            }
            UnsupportedFormSchema { issues } => {
                map.insert("error".into(), json!("Unsupported form schema"));
                map.insert("code".into(), json!("UNSUPPORTED_FORM_SCHEMA"));
                map.insert("issues".into(), json!(issues));
            }
            UnknownFields { unknown_fields } => {
                map.insert("error".into(), json!("Field validation failed"));
                map.insert("code".into(), json!("FIELD_VALIDATION_FAILED"));
                map.insert("unknown_fields".into(), json!(unknown_fields));
            }
            FieldValuesInvalid { issues } => {
                map.insert("error".into(), json!("Field validation failed"));
                map.insert("code".into(), json!("FIELD_VALIDATION_FAILED"));
                map.insert("issues".into(), issues_json(issues));
            }
            NotFound => {
                map.insert("error".into(), json!("Not found"));
            }
            PlanFeatureDisabled { feature, current, allowed, upgrade_url } => {
                map.insert("error".into(), json!("Plan feature disabled"));
                map.insert("code".into(), json!("PLAN_FEATURE_DISABLED"));
                map.insert("feature".into(), json!(feature));
                map.insert("current".into(), json!(current));
                map.insert("allowed".into(), json!(allowed));
                map.insert("upgrade_url".into(), json!(upgrade_url));
            }
            PlanLimitExceeded { feature, current, allowed, upgrade_url } => {
                map.insert("error".into(), json!("Plan limit exceeded"));
                map.insert("code".into(), json!("PLAN_LIMIT_EXCEEDED"));
                map.insert("feature".into(), json!(feature));
                map.insert("current".into(), json!(current));
                map.insert("allowed".into(), json!(allowed));
                map.insert("upgrade_url".into(), json!(upgrade_url));
            }
            Forbidden => {
                map.insert("error".into(), json!("Forbidden"));
            }
            FormStateConflict => {
                map.insert("error".into(), json!("Form state conflict"));
            }
            RateLimited => {
                map.insert("error".into(), json!("Too many submissions"));
                map.insert("code".into(), json!("RATE_LIMITED"));
            }
            RateLimitCheckFailed => {
                map.insert("error".into(), json!("Failed to evaluate rate limit"));
                map.insert("code".into(), json!("RATE_LIMIT_CHECK_FAILED"));
            }
            RunnerInternalError => {
                map.insert("error".into(), json!("Failed to submit form"));
                map.insert("code".into(), json!("RUNNER_INTERNAL_ERROR"));
            }

            InvalidPlanForCheckout => {
                map.insert("error".into(), json!("Plan is not valid for checkout"));
                map.insert("code".into(), json!("INVALID_PLAN_FOR_CHECKOUT"));
            }
            ContactSalesRequired => {
                map.insert("error".into(), json!("This plan requires contacting sales"));
                map.insert("code".into(), json!("CONTACT_SALES_REQUIRED"));
            }
            IdempotencyKeyReusedWithDifferentPayload => {
                map.insert("error".into(), json!("Idempotency key reused with a different payload"));
                map.insert("code".into(), json!("IDEMPOTENCY_KEY_REUSED_WITH_DIFFERENT_PAYLOAD"));
            }
            IdempotencyKeyExpired => {
                map.insert("error".into(), json!("Idempotency key has expired"));
                map.insert("code".into(), json!("IDEMPOTENCY_KEY_EXPIRED"));
            }
            CheckoutInProgress => {
                map.insert("error".into(), json!("A checkout attempt with this key is already in progress"));
                map.insert("code".into(), json!("CHECKOUT_IN_PROGRESS"));
            }
            CatalogOutOfSync => {
                map.insert("error".into(), json!("Billing catalog is out of sync"));
                map.insert("code".into(), json!("CATALOG_OUT_OF_SYNC"));
            }
            BillingConfigMissing { correlation_id } => {
                map.insert("error".into(), json!("Billing configuration is incomplete"));
                map.insert("code".into(), json!("BILLING_CONFIG_MISSING"));
                map.insert("correlation_id".into(), json!(correlation_id));
            }
            StripeCheckoutSessionFailed { correlation_id } => {
                map.insert("error".into(), json!("Failed to create checkout session"));
                map.insert("code".into(), json!("STRIPE_CHECKOUT_SESSION_FAILED"));
                map.insert("correlation_id".into(), json!(correlation_id));
            }
            StripePortalSessionFailed { correlation_id } => {
                map.insert("error".into(), json!("Failed to create billing portal session"));
                map.insert("code".into(), json!("STRIPE_PORTAL_SESSION_FAILED"));
                map.insert("correlation_id".into(), json!(correlation_id));
            }

            Unauthorized => {
                map.insert("error".into(), json!("Missing or invalid authorization"));
            }
            InternalTokenInvalid => {
                map.insert("error".into(), json!("Missing or invalid internal admin token"));
            }

            InvalidStripeSignature => {
                map.insert("error".into(), json!("Invalid Stripe signature"));
            }
            WebhookBodyTooLarge => {
                map.insert("error".into(), json!("Webhook body too large"));
            }
            WebhookMalformedPayload => {
                map.insert("error".into(), json!("Webhook payload is not valid"));
            }
            WebhookInternalError => {
                map.insert("error".into(), json!("Failed to ingest webhook event"));
            }

            CatalogSyncFailed { correlation_id } => {
                map.insert("error".into(), json!("Catalog sync failed"));
                map.insert("code".into(), json!("CATALOG_SYNC_FAILED"));
                map.insert("correlation_id".into(), json!(correlation_id));
            }

            BackendError { correlation_id } => {
                map.insert("error".into(), json!("Internal server error"));
                map.insert("correlation_id".into(), json!(correlation_id));
            }
        }

        Value::Object(map)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }
        (status, Json(self.body())).into_response()
    }
}

impl From<gatekit_webhook::WebhookError> for ApiError {
    fn from(err: gatekit_webhook::WebhookError) -> Self {
        match err {
            gatekit_webhook::WebhookError::MissingSignatureHeader => ApiError::InvalidStripeSignature,
            gatekit_webhook::WebhookError::InvalidSignature => ApiError::InvalidStripeSignature,
            gatekit_webhook::WebhookError::BodyTooLarge => ApiError::WebhookBodyTooLarge,
            gatekit_webhook::WebhookError::MalformedPayload => ApiError::WebhookMalformedPayload,
            gatekit_webhook::WebhookError::Db(_) => ApiError::WebhookInternalError,
        }
    }
}

impl From<crate::auth::AuthError> for ApiError {
    fn from(err: crate::auth::AuthError) -> Self {
        match err {
            crate::auth::AuthError::Unauthenticated => ApiError::Unauthorized,
            crate::auth::AuthError::Forbidden => ApiError::Unauthorized,
            crate::auth::AuthError::Backend(reason) => {
                let correlation_id = Uuid::new_v4();
                tracing::error!(%correlation_id, %reason, "auth collaborator call failed");
                ApiError::BackendError { correlation_id }
            }
        }
    }
}

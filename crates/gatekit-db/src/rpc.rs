//! Typed wrappers around the opaque database-collaborator RPCs (spec §6.2).
//!
//! Every function here calls a Postgres function whose body belongs to the
//! database collaborator, not to this crate — we only fix the call
//! signature and the documented error codes. No migration in this crate
//! creates these functions.

use chrono::{DateTime, Utc};
use gatekit_schemas::{PublishedForm, SubmissionQuota, WebhookEventRow, WebhookEventStatus, WorkspaceEntitlement};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::DbError;

fn db_error_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(e) => e.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// Strict anonymous rate-limit gate: 2 submissions per 60s per IP, enforced
/// with an advisory lock inside the opaque function. A `P0429` SQLSTATE maps
/// to [`DbError::RateLimited`]; anything else is a fail-closed 500.
pub async fn check_request(
    pool: &PgPool,
    client_ip: Option<&str>,
    user_agent: Option<&str>,
    referer: Option<&str>,
) -> Result<(), DbError> {
    let result = sqlx::query("select check_request($1, $2, $3)")
        .bind(client_ip)
        .bind(user_agent)
        .bind(referer)
        .execute(pool)
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) => {
            if db_error_code(&e).as_deref() == Some("P0429") {
                Err(DbError::RateLimited)
            } else {
                Err(DbError::Sqlx(e))
            }
        }
    }
}

pub async fn get_published_form_by_id(
    pool: &PgPool,
    form_id: Uuid,
) -> Result<PublishedForm, DbError> {
    let row = sqlx::query("select * from get_published_form_by_id($1)")
        .bind(form_id)
        .fetch_optional(pool)
        .await?;

    let row = row.ok_or(DbError::NotFound)?;

    Ok(PublishedForm {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        published_schema: row.try_get("published_schema")?,
        success_message: row.try_get("success_message")?,
        redirect_url: row.try_get("redirect_url")?,
        meta_title: row.try_get("meta_title")?,
        meta_description: row.try_get("meta_description")?,
        meta_image_url: row.try_get("meta_image_url")?,
        captcha_enabled: row.try_get("captcha_enabled")?,
        captcha_provider: row.try_get("captcha_provider")?,
        require_auth: row.try_get("require_auth")?,
        password_protected: row.try_get("password_protected")?,
    })
}

pub async fn get_form_submission_quota(
    pool: &PgPool,
    form_id: Uuid,
) -> Result<SubmissionQuota, DbError> {
    let row = sqlx::query("select * from get_form_submission_quota($1)")
        .bind(form_id)
        .fetch_one(pool)
        .await?;

    Ok(SubmissionQuota {
        feature_key: row.try_get("feature_key")?,
        is_enabled: row.try_get("is_enabled")?,
        limit_value: row.try_get("limit_value")?,
        current_usage: row.try_get("current_usage")?,
        workspace_id: row.try_get("workspace_id")?,
    })
}

/// Error classification for [`submit_form`], per spec §4.4 step 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitFormError {
    FormNotFound,
    Forbidden,
    StateConflict,
    Other,
}

pub async fn submit_form(
    pool: &PgPool,
    form_id: Uuid,
    data: &Value,
    idempotency_key: Uuid,
    client_ip: Option<&str>,
    user_agent: Option<&str>,
    referer: Option<&str>,
    started_at: Option<DateTime<Utc>>,
) -> Result<Uuid, (SubmitFormError, sqlx::Error)> {
    let result = sqlx::query("select submit_form($1, $2, $3, $4, $5, $6, $7) as submission_id")
        .bind(form_id)
        .bind(data)
        .bind(idempotency_key)
        .bind(client_ip)
        .bind(user_agent)
        .bind(referer)
        .bind(started_at)
        .fetch_one(pool)
        .await;

    match result {
        Ok(row) => row
            .try_get::<Uuid, _>("submission_id")
            .map_err(|e| (SubmitFormError::Other, e)),
        Err(e) => {
            let kind = match db_error_code(&e).as_deref() {
                Some("P0002") => SubmitFormError::FormNotFound,
                Some("42501") => SubmitFormError::Forbidden,
                Some(code) if ("P0003"..="P0008").contains(&code) => SubmitFormError::StateConflict,
                _ => SubmitFormError::Other,
            };
            Err((kind, e))
        }
    }
}

pub struct EnsureFreeSubscriptionResult {
    pub subscription_id: Uuid,
    pub created: bool,
}

pub async fn ensure_free_subscription_for_workspace(
    pool: &PgPool,
    workspace_id: Uuid,
    source: &str,
) -> Result<EnsureFreeSubscriptionResult, DbError> {
    let row = sqlx::query("select * from ensure_free_subscription_for_workspace($1, $2)")
        .bind(workspace_id)
        .bind(source)
        .fetch_one(pool)
        .await?;

    Ok(EnsureFreeSubscriptionResult {
        subscription_id: row.try_get("subscription_id")?,
        created: row.try_get("created")?,
    })
}

pub async fn get_workspace_entitlements(
    pool: &PgPool,
    workspace_id: Uuid,
) -> Result<Vec<WorkspaceEntitlement>, DbError> {
    let rows = sqlx::query("select * from get_workspace_entitlements($1)")
        .bind(workspace_id)
        .fetch_all(pool)
        .await?;

    rows.into_iter()
        .map(|row| {
            Ok(WorkspaceEntitlement {
                feature_key: row.try_get("feature_key")?,
                is_enabled: row.try_get("is_enabled")?,
                limit_value: row.try_get("limit_value")?,
            })
        })
        .collect()
}

/// Claim a single webhook event row for exclusive processing.
///
/// Atomically selects the row if `(pending|failed with next_attempt_at <=
/// now)` or `(processing with claim_expires_at < now)`, with
/// `attempts < max_attempts`, and marks it `processing`. Returns `None` if
/// no row matched (already claimed, not yet due, or exhausted).
pub async fn claim_stripe_webhook_event(
    pool: &PgPool,
    event_id: Uuid,
    processor_id: &str,
    ttl_seconds: i64,
    max_attempts: i32,
) -> Result<Option<WebhookEventRow>, DbError> {
    let row = sqlx::query("select * from claim_stripe_webhook_event($1, $2, $3, $4)")
        .bind(event_id)
        .bind(processor_id)
        .bind(ttl_seconds)
        .bind(max_attempts)
        .fetch_optional(pool)
        .await?;

    let row = match row {
        Some(r) => r,
        None => return Ok(None),
    };

    let status_str: String = row.try_get("status")?;
    let status = WebhookEventStatus::parse(&status_str)
        .ok_or_else(|| DbError::Other(anyhow::anyhow!("unknown webhook event status: {status_str}")))?;

    Ok(Some(WebhookEventRow {
        id: row.try_get("id")?,
        external_event_id: row.try_get("external_event_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        status,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        processor_id: row.try_get("processor_id")?,
        processing_started_at: row.try_get("processing_started_at")?,
        claim_expires_at: row.try_get("claim_expires_at")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    }))
}

/// Not one of the seven RPCs spec §6.2 fixes — workspace/role lookups are
/// named there as an out-of-scope external collaborator without a wire
/// contract. Authenticated billing routes still need a yes/no answer to
/// "is this user an owner or admin of this workspace", so `gatekit-daemon`'s
/// auth seam (`auth::SupabaseAuthClient`) calls this the same way it calls
/// every other opaque function here, after independently validating the
/// bearer token against Supabase's GoTrue `/auth/v1/user` endpoint. See
/// DESIGN.md for the full rationale.
pub async fn is_workspace_admin(pool: &PgPool, workspace_id: Uuid, user_id: Uuid) -> Result<bool, DbError> {
    let row = sqlx::query("select is_workspace_admin($1, $2) as is_admin")
        .bind(workspace_id)
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("is_admin")?)
}

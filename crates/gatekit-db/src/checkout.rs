//! Directly-owned `checkout_idempotency` table (C5).

use chrono::{DateTime, Utc};
use gatekit_schemas::{CheckoutIdempotencyRow, CheckoutIdempotencyStatus};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::DbError;

fn row_to_checkout(row: sqlx::postgres::PgRow) -> Result<CheckoutIdempotencyRow, DbError> {
    let status_str: String = row.try_get("status")?;
    let status = CheckoutIdempotencyStatus::parse(&status_str)
        .ok_or_else(|| DbError::Other(anyhow::anyhow!("unknown checkout status: {status_str}")))?;

    Ok(CheckoutIdempotencyRow {
        workspace_id: row.try_get("workspace_id")?,
        client_key: row.try_get("client_key")?,
        plan_variant_id: row.try_get("plan_variant_id")?,
        request_fingerprint: row.try_get("request_fingerprint")?,
        upstream_idempotency_key: row.try_get("upstream_idempotency_key")?,
        upstream_session_id: row.try_get("upstream_session_id")?,
        upstream_session_url: row.try_get("upstream_session_url")?,
        status,
        expires_at: row.try_get("expires_at")?,
        last_error: row.try_get("last_error")?,
    })
}

/// Insert a new `in_progress` row. Returns `None` on unique-key conflict —
/// callers reload via [`load`] and re-evaluate replay rules (spec §4.5).
pub async fn insert_in_progress(
    pool: &PgPool,
    workspace_id: Uuid,
    client_key: Uuid,
    plan_variant_id: Uuid,
    request_fingerprint: &str,
    upstream_idempotency_key: &str,
    expires_at: DateTime<Utc>,
) -> Result<Option<CheckoutIdempotencyRow>, DbError> {
    let row = sqlx::query(
        r#"
        insert into checkout_idempotency
            (workspace_id, client_key, plan_variant_id, request_fingerprint,
             upstream_idempotency_key, status, expires_at)
        values ($1, $2, $3, $4, $5, 'in_progress', $6)
        on conflict (workspace_id, client_key) do nothing
        returning workspace_id, client_key, plan_variant_id, request_fingerprint,
                  upstream_idempotency_key, upstream_session_id, upstream_session_url,
                  status, expires_at, last_error
        "#,
    )
    .bind(workspace_id)
    .bind(client_key)
    .bind(plan_variant_id)
    .bind(request_fingerprint)
    .bind(upstream_idempotency_key)
    .bind(expires_at)
    .fetch_optional(pool)
    .await?;

    row.map(row_to_checkout).transpose()
}

pub async fn load(
    pool: &PgPool,
    workspace_id: Uuid,
    client_key: Uuid,
) -> Result<Option<CheckoutIdempotencyRow>, DbError> {
    let row = sqlx::query(
        r#"
        select workspace_id, client_key, plan_variant_id, request_fingerprint,
               upstream_idempotency_key, upstream_session_id, upstream_session_url,
               status, expires_at, last_error
        from checkout_idempotency
        where workspace_id = $1 and client_key = $2
        "#,
    )
    .bind(workspace_id)
    .bind(client_key)
    .fetch_optional(pool)
    .await?;

    row.map(row_to_checkout).transpose()
}

pub async fn mark_completed(
    pool: &PgPool,
    workspace_id: Uuid,
    client_key: Uuid,
    session_id: &str,
    session_url: &str,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        update checkout_idempotency
        set status = 'completed', upstream_session_id = $3, upstream_session_url = $4, last_error = null
        where workspace_id = $1 and client_key = $2
        "#,
    )
    .bind(workspace_id)
    .bind(client_key)
    .bind(session_id)
    .bind(session_url)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_failed(
    pool: &PgPool,
    workspace_id: Uuid,
    client_key: Uuid,
    error: &str,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        update checkout_idempotency
        set status = 'failed', last_error = $3
        where workspace_id = $1 and client_key = $2
        "#,
    )
    .bind(workspace_id)
    .bind(client_key)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

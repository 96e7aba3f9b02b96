//! Directly-owned `webhook_events` table (C7 ingestion + C9 retry scan).
//!
//! The claim itself (transitioning pending/stale-processing → processing)
//! is the opaque [`crate::rpc::claim_stripe_webhook_event`] RPC; this module
//! only covers the parts of the row's lifecycle that are ours to own:
//! initial insertion, terminal status updates, and candidate scans.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::DbError;

/// Insert a new pending event row. Returns `None` on unique-violation
/// (`external_event_id` already seen) — the caller responds
/// `{received:true, duplicate:true}` without scheduling processing again.
/// On a fresh insert, returns the row's internal id so the caller can
/// schedule a claim attempt for it.
pub async fn insert_pending(
    pool: &PgPool,
    external_event_id: &str,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<Option<Uuid>, DbError> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        insert into webhook_events (external_event_id, event_type, payload, status)
        values ($1, $2, $3, 'pending')
        on conflict (external_event_id) do nothing
        returning id
        "#,
    )
    .bind(external_event_id)
    .bind(event_type)
    .bind(payload)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id,)| id))
}

pub async fn mark_completed(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
    sqlx::query(
        r#"
        update webhook_events
        set status = 'completed', processed_at = now(),
            processor_id = null, processing_started_at = null, claim_expires_at = null
        where id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark a claimed row `failed` with the computed backoff, clearing claim
/// fields. `error` is truncated to 1000 chars before storage (spec §4.8).
pub async fn mark_failed(
    pool: &PgPool,
    id: Uuid,
    next_attempt_at: DateTime<Utc>,
    error: &str,
) -> Result<(), DbError> {
    let truncated: String = error.chars().take(1000).collect();
    sqlx::query(
        r#"
        update webhook_events
        set status = 'failed', next_attempt_at = $2, last_error = $3,
            processor_id = null, processing_started_at = null, claim_expires_at = null
        where id = $1
        "#,
    )
    .bind(id)
    .bind(next_attempt_at)
    .bind(truncated)
    .execute(pool)
    .await?;
    Ok(())
}

/// Event ids currently eligible for a claim attempt: pending, due-failed, or
/// stale-processing, below `max_attempts`. C9's retry tick feeds these ids
/// into [`crate::rpc::claim_stripe_webhook_event`] one at a time.
pub async fn list_claimable_ids(
    pool: &PgPool,
    max_attempts: i32,
    batch_size: i64,
) -> Result<Vec<Uuid>, DbError> {
    let rows = sqlx::query(
        r#"
        select id from webhook_events
        where attempts < $1
          and (
            (status in ('pending', 'failed') and (next_attempt_at is null or next_attempt_at <= now()))
            or (status = 'processing' and claim_expires_at < now())
          )
        order by created_at asc
        limit $2
        "#,
    )
    .bind(max_attempts)
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(|r| Ok(r.try_get::<Uuid, _>("id")?)).collect()
}

/// Purge completed rows older than the given cutoff (spec §3.4 lifecycle:
/// "`completed` rows with old `processed_at` are purged by C9").
pub async fn purge_completed_before(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
    let result = sqlx::query("delete from webhook_events where status = 'completed' and processed_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Rows stuck at or past `max_attempts`, surfaced for operator inspection
/// only — never consulted by the claim/retry path itself.
pub async fn list_failed_webhook_events_for_inspection(
    pool: &PgPool,
    max_attempts: i32,
    limit: i64,
) -> Result<Vec<Uuid>, DbError> {
    let rows = sqlx::query(
        r#"
        select id from webhook_events
        where status = 'failed' and attempts >= $1
        order by created_at asc
        limit $2
        "#,
    )
    .bind(max_attempts)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(|r| Ok(r.try_get::<Uuid, _>("id")?)).collect()
}

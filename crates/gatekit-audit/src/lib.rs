//! Append-only log of `BillingCustomerEvent` rows (spec §3.1, §4.6, §4.8).
//!
//! The teacher's `mqk-audit` appends JSON Lines to a local file with an
//! optional SHA-256 hash chain for tamper evidence. This system's
//! `BillingCustomerEvent` is a database-owned entity (`billing_customer_events`,
//! migrated by `gatekit-db`), not a local artifact, so this crate keeps the
//! teacher's "one append call per event, never mutated afterward" shape but
//! writes rows through `sqlx` instead of a file handle. The hash chain is
//! dropped: tamper evidence on a row no untrusted process can reach directly
//! adds nothing here, and the database already gives us durability and an
//! audit trail via `created_at` ordering.

use anyhow::Result;
use chrono::{DateTime, Utc};
use gatekit_db::DbError;
use gatekit_schemas::BillingCustomerEventType;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// One row as read back from `billing_customer_events`.
#[derive(Debug, Clone)]
pub struct BillingCustomerEvent {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub event_type: BillingCustomerEventType,
    pub old_customer_id: Option<String>,
    pub new_customer_id: Option<String>,
    pub reason: Option<String>,
    pub upstream_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn parse_event_type(s: &str) -> Result<BillingCustomerEventType> {
    Ok(match s {
        "validated" => BillingCustomerEventType::Validated,
        "invalidated" => BillingCustomerEventType::Invalidated,
        "recreated" => BillingCustomerEventType::Recreated,
        "webhook_deleted" => BillingCustomerEventType::WebhookDeleted,
        other => anyhow::bail!("unknown billing customer event type: {other}"),
    })
}

/// Append one `BillingCustomerEvent` row. Never updates or deletes an
/// existing row — every call to this function is a new fact, not a
/// correction.
pub async fn record(
    pool: &PgPool,
    workspace_id: Uuid,
    event_type: BillingCustomerEventType,
    old_customer_id: Option<&str>,
    new_customer_id: Option<&str>,
    reason: Option<&str>,
    upstream_event_id: Option<&str>,
) -> Result<Uuid, DbError> {
    let row: (Uuid,) = sqlx::query_as(
        r#"
        insert into billing_customer_events
            (workspace_id, event_type, old_customer_id, new_customer_id, reason, upstream_event_id)
        values ($1, $2, $3, $4, $5, $6)
        returning id
        "#,
    )
    .bind(workspace_id)
    .bind(event_type.as_str())
    .bind(old_customer_id)
    .bind(new_customer_id)
    .bind(reason)
    .bind(upstream_event_id)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

/// Read back a workspace's event history, most recent first. Used by
/// operator-facing introspection only; the pipeline never reads its own
/// audit trail to make decisions.
pub async fn list_for_workspace(
    pool: &PgPool,
    workspace_id: Uuid,
    limit: i64,
) -> Result<Vec<BillingCustomerEvent>, DbError> {
    let rows = sqlx::query(
        r#"
        select id, workspace_id, event_type, old_customer_id, new_customer_id,
               reason, upstream_event_id, created_at
        from billing_customer_events
        where workspace_id = $1
        order by created_at desc
        limit $2
        "#,
    )
    .bind(workspace_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let type_str: String = row.try_get("event_type")?;
            let event_type = parse_event_type(&type_str).map_err(DbError::Other)?;
            Ok(BillingCustomerEvent {
                id: row.try_get("id")?,
                workspace_id: row.try_get("workspace_id")?,
                event_type,
                old_customer_id: row.try_get("old_customer_id")?,
                new_customer_id: row.try_get("new_customer_id")?,
                reason: row.try_get("reason")?,
                upstream_event_id: row.try_get("upstream_event_id")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}

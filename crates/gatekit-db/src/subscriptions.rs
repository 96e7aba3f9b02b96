//! Directly-owned `subscriptions` table (C8 subscription sync).

use chrono::{DateTime, Utc};
use gatekit_schemas::{PlanSlug, SubscriptionRow, SubscriptionStatus};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::DbError;

fn row_to_subscription(row: sqlx::postgres::PgRow) -> Result<SubscriptionRow, DbError> {
    let plan_str: String = row.try_get("plan")?;
    let plan = PlanSlug::parse(&plan_str)
        .ok_or_else(|| DbError::Other(anyhow::anyhow!("unknown plan slug: {plan_str}")))?;
    let status_str: String = row.try_get("status")?;
    let status = SubscriptionStatus::parse(&status_str)
        .ok_or_else(|| DbError::Other(anyhow::anyhow!("unknown subscription status: {status_str}")))?;

    Ok(SubscriptionRow {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        plan,
        plan_variant_id: row.try_get("plan_variant_id")?,
        status,
        upstream_subscription_id: row.try_get("upstream_subscription_id")?,
        customer_id: row.try_get("customer_id")?,
        current_period_start: row.try_get("current_period_start")?,
        current_period_end: row.try_get("current_period_end")?,
        trial_start: row.try_get("trial_start")?,
        trial_end: row.try_get("trial_end")?,
        cancel_at_period_end: row.try_get("cancel_at_period_end")?,
        canceled_at: row.try_get("canceled_at")?,
        ended_at: row.try_get("ended_at")?,
        grace_period_end: row.try_get("grace_period_end")?,
        metadata: row.try_get("metadata")?,
    })
}

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, workspace_id, plan, plan_variant_id, status, upstream_subscription_id,
    customer_id, current_period_start, current_period_end, trial_start, trial_end,
    cancel_at_period_end, canceled_at, ended_at, grace_period_end, metadata
"#;

pub async fn find_by_upstream_id(
    pool: &PgPool,
    upstream_subscription_id: &str,
) -> Result<Option<SubscriptionRow>, DbError> {
    let query = format!("select {SUBSCRIPTION_COLUMNS} from subscriptions where upstream_subscription_id = $1");
    let row = sqlx::query(&query)
        .bind(upstream_subscription_id)
        .fetch_optional(pool)
        .await?;
    row.map(row_to_subscription).transpose()
}

pub async fn find_latest_entitled_for_workspace(
    pool: &PgPool,
    workspace_id: Uuid,
) -> Result<Option<SubscriptionRow>, DbError> {
    let query = format!(
        "select {SUBSCRIPTION_COLUMNS} from subscriptions \
         where workspace_id = $1 and status in ('active', 'trialing', 'past_due') \
         order by current_period_start desc nulls last limit 1"
    );
    let row = sqlx::query(&query).bind(workspace_id).fetch_optional(pool).await?;
    row.map(row_to_subscription).transpose()
}

/// Find any subscription row linked to an upstream customer id, regardless
/// of workspace. Used by C8's workspace-resolution fallback chain when
/// neither a hint, subscription metadata, nor an existing row by upstream
/// subscription id is available (spec §4.8 step 1).
pub async fn find_by_customer_id(
    pool: &PgPool,
    customer_id: &str,
) -> Result<Option<SubscriptionRow>, DbError> {
    let query = format!(
        "select {SUBSCRIPTION_COLUMNS} from subscriptions \
         where customer_id = $1 order by current_period_start desc nulls last limit 1"
    );
    let row = sqlx::query(&query).bind(customer_id).fetch_optional(pool).await?;
    row.map(row_to_subscription).transpose()
}

#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &PgPool,
    workspace_id: Uuid,
    plan: PlanSlug,
    plan_variant_id: Option<Uuid>,
    status: SubscriptionStatus,
    upstream_subscription_id: Option<&str>,
    customer_id: Option<&str>,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    trial_start: Option<DateTime<Utc>>,
    trial_end: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    canceled_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    metadata: &Value,
) -> Result<Uuid, DbError> {
    let row: (Uuid,) = sqlx::query_as(
        r#"
        insert into subscriptions
            (workspace_id, plan, plan_variant_id, status, upstream_subscription_id,
             customer_id, current_period_start, current_period_end, trial_start, trial_end,
             cancel_at_period_end, canceled_at, ended_at, metadata)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        returning id
        "#,
    )
    .bind(workspace_id)
    .bind(plan.as_str())
    .bind(plan_variant_id)
    .bind(status.as_str())
    .bind(upstream_subscription_id)
    .bind(customer_id)
    .bind(current_period_start)
    .bind(current_period_end)
    .bind(trial_start)
    .bind(trial_end)
    .bind(cancel_at_period_end)
    .bind(canceled_at)
    .bind(ended_at)
    .bind(metadata)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

#[allow(clippy::too_many_arguments)]
pub async fn update(
    pool: &PgPool,
    id: Uuid,
    plan: PlanSlug,
    plan_variant_id: Option<Uuid>,
    status: SubscriptionStatus,
    upstream_subscription_id: Option<&str>,
    customer_id: Option<&str>,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    trial_start: Option<DateTime<Utc>>,
    trial_end: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    canceled_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    metadata: &Value,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        update subscriptions set
            plan = $2, plan_variant_id = $3, status = $4, upstream_subscription_id = $5,
            customer_id = $6, current_period_start = $7, current_period_end = $8,
            trial_start = $9, trial_end = $10, cancel_at_period_end = $11,
            canceled_at = $12, ended_at = $13, metadata = $14
        where id = $1
        "#,
    )
    .bind(id)
    .bind(plan.as_str())
    .bind(plan_variant_id)
    .bind(status.as_str())
    .bind(upstream_subscription_id)
    .bind(customer_id)
    .bind(current_period_start)
    .bind(current_period_end)
    .bind(trial_start)
    .bind(trial_end)
    .bind(cancel_at_period_end)
    .bind(canceled_at)
    .bind(ended_at)
    .bind(metadata)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_grace_period_end(
    pool: &PgPool,
    upstream_subscription_id: &str,
    grace_period_end: Option<DateTime<Utc>>,
) -> Result<(), DbError> {
    sqlx::query("update subscriptions set grace_period_end = $2 where upstream_subscription_id = $1")
        .bind(upstream_subscription_id)
        .bind(grace_period_end)
        .execute(pool)
        .await?;
    Ok(())
}

/// Cancel every subscription linked to a deleted upstream customer, for the
/// `customer.deleted` webhook handler (spec §4.8). Returns affected
/// workspace ids.
pub async fn cancel_all_for_customer(pool: &PgPool, customer_id: &str, now: DateTime<Utc>) -> Result<Vec<Uuid>, DbError> {
    let rows = sqlx::query(
        r#"
        update subscriptions
        set status = 'canceled', canceled_at = $2, ended_at = $2
        where customer_id = $1 and status not in ('canceled')
        returning workspace_id
        "#,
    )
    .bind(customer_id)
    .bind(now)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(|r| Ok(r.try_get::<Uuid, _>("workspace_id")?)).collect()
}

/// Cancel a single subscription whose grace period lapsed (C9 grace-expiry
/// pass), clearing `grace_period_end` along with the cancellation fields.
pub async fn cancel_for_grace_expiry(pool: &PgPool, id: Uuid, now: DateTime<Utc>) -> Result<(), DbError> {
    sqlx::query(
        r#"
        update subscriptions
        set status = 'canceled', canceled_at = $2, ended_at = $2, grace_period_end = null
        where id = $1
        "#,
    )
    .bind(id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Find subscriptions whose grace period has lapsed (C9 grace-expiry pass).
pub async fn find_expired_grace(pool: &PgPool, now: DateTime<Utc>, batch_size: i64) -> Result<Vec<SubscriptionRow>, DbError> {
    let query = format!(
        "select {SUBSCRIPTION_COLUMNS} from subscriptions \
         where grace_period_end is not null and grace_period_end <= $1 \
         and status in ('past_due') \
         limit $2"
    );
    let rows = sqlx::query(&query).bind(now).bind(batch_size).fetch_all(pool).await?;
    rows.into_iter().map(row_to_subscription).collect()
}

/// Update the denormalized `workspaces.plan` cache column. The `workspaces`
/// table belongs to the wider product schema and isn't migrated here.
pub async fn refresh_workspace_plan_cache(
    pool: &PgPool,
    workspace_id: Uuid,
    plan: PlanSlug,
) -> Result<(), DbError> {
    sqlx::query("update workspaces set plan = $2 where id = $1")
        .bind(workspace_id)
        .bind(plan.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

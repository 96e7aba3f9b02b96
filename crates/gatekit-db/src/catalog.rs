//! Directly-owned `plan_variants` table (C10 catalog sync).

use gatekit_schemas::{BillingInterval, PlanSlug, PlanVariantRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::DbError;

fn row_to_plan_variant(row: sqlx::postgres::PgRow) -> Result<PlanVariantRow, DbError> {
    let plan_str: String = row.try_get("plan_slug")?;
    let plan_slug = PlanSlug::parse(&plan_str)
        .ok_or_else(|| DbError::Other(anyhow::anyhow!("unknown plan slug: {plan_str}")))?;
    let interval_str: String = row.try_get("billing_interval")?;
    let billing_interval = BillingInterval::parse(&interval_str)
        .ok_or_else(|| DbError::Other(anyhow::anyhow!("unknown billing billing_interval: {interval_str}")))?;

    Ok(PlanVariantRow {
        id: row.try_get("id")?,
        plan_slug,
        interval: billing_interval,
        currency: row.try_get("currency")?,
        active: row.try_get("active")?,
        upstream_price_id: row.try_get("upstream_price_id")?,
        amount_cents: row.try_get("amount_cents")?,
        trial_period_days: row.try_get("trial_period_days")?,
    })
}

const PLAN_VARIANT_COLUMNS: &str =
    "id, plan_slug, billing_interval, currency, active, upstream_price_id, amount_cents, trial_period_days";

pub async fn find_by_upstream_price_id(
    pool: &PgPool,
    upstream_price_id: &str,
) -> Result<Option<PlanVariantRow>, DbError> {
    let query = format!("select {PLAN_VARIANT_COLUMNS} from plan_variants where upstream_price_id = $1");
    let row = sqlx::query(&query).bind(upstream_price_id).fetch_optional(pool).await?;
    row.map(row_to_plan_variant).transpose()
}

/// Look up the active variant for a `(plan_slug, interval)` pair, used by
/// the checkout-session handler to resolve the variant id a client's plan
/// request maps to.
pub async fn find_active(
    pool: &PgPool,
    plan_slug: PlanSlug,
    billing_interval: BillingInterval,
) -> Result<Option<PlanVariantRow>, DbError> {
    let query =
        format!("select {PLAN_VARIANT_COLUMNS} from plan_variants where active and plan_slug = $1 and billing_interval = $2");
    let row = sqlx::query(&query)
        .bind(plan_slug.as_str())
        .bind(billing_interval.as_str())
        .fetch_optional(pool)
        .await?;
    row.map(row_to_plan_variant).transpose()
}

/// Upsert a variant discovered during catalog sync, keyed on the upstream
/// price id (spec §4.10). `active` tracks whether the upstream price is
/// still listed; sync marks rows it didn't see as inactive rather than
/// deleting them, since historical subscriptions may still reference them.
#[allow(clippy::too_many_arguments)]
pub async fn upsert(
    pool: &PgPool,
    plan_slug: PlanSlug,
    billing_interval: BillingInterval,
    currency: &str,
    upstream_price_id: &str,
    amount_cents: i64,
    trial_period_days: i32,
) -> Result<Uuid, DbError> {
    let row: (Uuid,) = sqlx::query_as(
        r#"
        insert into plan_variants
            (plan_slug, billing_interval, currency, active, upstream_price_id, amount_cents, trial_period_days)
        values ($1, $2, $3, true, $4, $5, $6)
        on conflict (upstream_price_id) do update set
            plan_slug = excluded.plan_slug,
            billing_interval = excluded.billing_interval,
            currency = excluded.currency,
            active = true,
            amount_cents = excluded.amount_cents,
            trial_period_days = excluded.trial_period_days
        returning id
        "#,
    )
    .bind(plan_slug.as_str())
    .bind(billing_interval.as_str())
    .bind(currency)
    .bind(upstream_price_id)
    .bind(amount_cents)
    .bind(trial_period_days)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Mark variants inactive whose upstream price id wasn't seen in the latest
/// sync pass. `seen_price_ids` empty is treated as "sync produced nothing"
/// and is a no-op, guarding against an upstream outage wiping the catalog.
pub async fn deactivate_missing(pool: &PgPool, seen_price_ids: &[String]) -> Result<u64, DbError> {
    if seen_price_ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query("update plan_variants set active = false where active and not (upstream_price_id = any($1))")
        .bind(seen_price_ids)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

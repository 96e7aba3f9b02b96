//! C9 — Scheduled reconciler: one external cron tick dispatched to the
//! matching handler (spec §4.9).
//!
//! Scheduled jobs are not cron-in-process here — an external trigger (a
//! system cron entry, a k8s CronJob, an operator's scheduler of choice)
//! supplies the cron expression that just fired, and [`run_tick`] picks the
//! matching handler. This keeps a single tick idempotent and bounded by
//! batch size, with no long-lived in-process scheduler to keep alive.

use chrono::Utc;
use gatekit_billing::catalog::{sync_catalog, CatalogSyncReport};
use gatekit_billing::client::BillingClient;
use gatekit_db::{rpc, subscriptions as subscriptions_db, webhooks as webhooks_db};
use gatekit_webhook::{claim_and_process, ClaimOutcome};
use sqlx::PgPool;
use tracing::warn;

/// Rows surfaced by [`webhooks_db::list_failed_webhook_events_for_inspection`]
/// in one retry tick's dead-letter log line, capped so a large backlog
/// doesn't spam the log with every stuck event id.
const DEAD_LETTER_LOG_LIMIT: i64 = 20;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Db(#[from] gatekit_db::DbError),
    #[error(transparent)]
    Billing(#[from] gatekit_billing::client::BillingError),
    #[error(transparent)]
    Webhook(#[from] gatekit_webhook::WebhookError),
}

/// Cron expressions recognized by [`run_tick`] beyond the configured catalog
/// sync cron (spec §4.9).
pub const RETRY_TICK_CRON: &str = "*/5 * * * *";
pub const GRACE_EXPIRY_CRON: &str = "0 * * * *";
pub const RETENTION_CRON: &str = "30 2 * * *";

/// Everything a tick needs besides the pool and the billing client, mirroring
/// the subset of [`gatekit_config::AppConfig`] that the reconciler consumes.
pub struct ReconcileConfig {
    pub processor_id: String,
    pub webhook_claim_ttl_seconds: i64,
    pub webhook_max_attempts: i32,
    pub stripe_retry_batch_size: i64,
    pub stripe_grace_batch_size: i64,
    pub billing_grace_days: i64,
    pub catalog_env: Option<String>,
    pub catalog_sync_cron: String,
    /// `STRIPE_CATALOG_SYNC_ENABLED` (spec §6.3). Gates only the *scheduled*
    /// catalog tick below — a forced sync triggered from the checkout/webhook
    /// fallback path (`gatekit_billing::catalog::sync_catalog` called
    /// directly by those callers) always runs regardless of this flag
    /// (spec §4.10: "Forced sync … ignores the enabled flag").
    pub catalog_sync_enabled: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryTickReport {
    pub selected: usize,
    pub completed: usize,
    pub failed: usize,
    pub not_claimed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GraceTickReport {
    pub expired: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetentionTickReport {
    pub purged: u64,
}

#[derive(Debug, Clone)]
pub enum TickReport {
    Retry(RetryTickReport),
    Grace(GraceTickReport),
    Catalog(CatalogSyncReport),
    Retention(RetentionTickReport),
    /// An unrecognized cron expression runs every handler sequentially
    /// rather than doing nothing (spec §4.9: "Unknown cron ⇒ run retry +
    /// grace + catalog + cleanup sequentially").
    Fallback {
        retry: RetryTickReport,
        grace: GraceTickReport,
        catalog: CatalogSyncReport,
        retention: RetentionTickReport,
    },
}

/// Dispatch one scheduler tick by matching `cron_expression` against the
/// fixed table in spec §4.9, plus the operator-configured catalog cron.
pub async fn run_tick(
    pool: &PgPool,
    billing: &dyn BillingClient,
    config: &ReconcileConfig,
    cron_expression: &str,
) -> Result<TickReport, ReconcileError> {
    if cron_expression == RETRY_TICK_CRON {
        return Ok(TickReport::Retry(run_retry_tick(pool, billing, config).await?));
    }
    if cron_expression == GRACE_EXPIRY_CRON {
        return Ok(TickReport::Grace(run_grace_tick(pool, config).await?));
    }
    if cron_expression == RETENTION_CRON {
        return Ok(TickReport::Retention(run_retention_tick(pool).await?));
    }
    if cron_expression == config.catalog_sync_cron {
        return Ok(TickReport::Catalog(run_catalog_tick(pool, billing, config).await?));
    }

    let retry = run_retry_tick(pool, billing, config).await?;
    let grace = run_grace_tick(pool, config).await?;
    let catalog = run_catalog_tick(pool, billing, config).await?;
    let retention = run_retention_tick(pool).await?;
    Ok(TickReport::Fallback { retry, grace, catalog, retention })
}

/// Claim and process each due webhook row, oldest first, capped at
/// `stripe_retry_batch_size` (spec §4.9 retry tick).
async fn run_retry_tick(
    pool: &PgPool,
    billing: &dyn BillingClient,
    config: &ReconcileConfig,
) -> Result<RetryTickReport, ReconcileError> {
    let ids = webhooks_db::list_claimable_ids(pool, config.webhook_max_attempts, config.stripe_retry_batch_size).await?;
    let mut report = RetryTickReport { selected: ids.len(), ..Default::default() };

    for id in ids {
        let outcome = claim_and_process(
            pool,
            billing,
            config.catalog_env.as_deref(),
            config.billing_grace_days,
            id,
            &config.processor_id,
            config.webhook_claim_ttl_seconds,
            config.webhook_max_attempts,
        )
        .await?;

        match outcome {
            ClaimOutcome::Completed => report.completed += 1,
            ClaimOutcome::Failed => report.failed += 1,
            ClaimOutcome::NotClaimed => report.not_claimed += 1,
        }
    }

    let stuck = webhooks_db::list_failed_webhook_events_for_inspection(
        pool,
        config.webhook_max_attempts,
        DEAD_LETTER_LOG_LIMIT,
    )
    .await?;
    if !stuck.is_empty() {
        warn!(count = stuck.len(), ids = ?stuck, "webhook events stuck at max attempts");
    }

    Ok(report)
}

/// Cancel every `past_due` subscription whose grace period lapsed, ensure
/// each affected workspace keeps a free row, and refresh its plan cache
/// (spec §4.9 grace-expiry tick).
async fn run_grace_tick(pool: &PgPool, config: &ReconcileConfig) -> Result<GraceTickReport, ReconcileError> {
    let now = Utc::now();
    let expired = subscriptions_db::find_expired_grace(pool, now, config.stripe_grace_batch_size).await?;
    let count = expired.len();

    for row in expired {
        subscriptions_db::cancel_for_grace_expiry(pool, row.id, now).await?;
        rpc::ensure_free_subscription_for_workspace(pool, row.workspace_id, "grace_expiry").await?;
        let plan = subscriptions_db::find_latest_entitled_for_workspace(pool, row.workspace_id)
            .await?
            .map(|r| r.plan)
            .unwrap_or(gatekit_schemas::PlanSlug::Free);
        subscriptions_db::refresh_workspace_plan_cache(pool, row.workspace_id, plan).await?;
    }

    Ok(GraceTickReport { expired: count })
}

/// Run catalog sync for the *scheduled* tick, honoring
/// `STRIPE_CATALOG_SYNC_ENABLED`. A disabled sync reports an all-zero
/// [`CatalogSyncReport`] rather than being omitted from the tick's report
/// shape entirely.
async fn run_catalog_tick(
    pool: &PgPool,
    billing: &dyn BillingClient,
    config: &ReconcileConfig,
) -> Result<CatalogSyncReport, ReconcileError> {
    if !config.catalog_sync_enabled {
        return Ok(CatalogSyncReport::default());
    }
    Ok(sync_catalog(pool, billing, config.catalog_env.as_deref()).await?)
}

/// Delete `completed` webhook rows older than 30 days (spec §4.9 retention
/// tick).
async fn run_retention_tick(pool: &PgPool) -> Result<RetentionTickReport, ReconcileError> {
    let cutoff = Utc::now() - chrono::Duration::days(30);
    let purged = webhooks_db::purge_completed_before(pool, cutoff).await?;
    Ok(RetentionTickReport { purged })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekit_billing::fake::FakeBillingClient;
    use sqlx::postgres::PgPoolOptions;

    fn config(catalog_sync_enabled: bool) -> ReconcileConfig {
        ReconcileConfig {
            processor_id: "test-processor".to_string(),
            webhook_claim_ttl_seconds: 300,
            webhook_max_attempts: 8,
            stripe_retry_batch_size: 200,
            stripe_grace_batch_size: 500,
            billing_grace_days: 7,
            catalog_env: None,
            catalog_sync_cron: "*/15 * * * *".to_string(),
            catalog_sync_enabled,
        }
    }

    /// A disabled `STRIPE_CATALOG_SYNC_ENABLED` short-circuits the scheduled
    /// catalog tick before it ever touches the pool or the billing client
    /// (spec §6.3) — a lazily-connected pool that would error on first real
    /// query proves no query was attempted.
    #[tokio::test]
    async fn disabled_catalog_sync_short_circuits_the_scheduled_tick() {
        let pool = PgPoolOptions::new().connect_lazy("postgres://unused/unused").unwrap();
        let billing = FakeBillingClient::new();

        let report = run_catalog_tick(&pool, &billing, &config(false)).await.unwrap();
        assert_eq!(report, CatalogSyncReport::default());
    }
}

use chrono::{Duration, Utc};
use gatekit_billing::fake::FakeBillingClient;
use gatekit_reconcile::{ReconcileConfig, TickReport, RETENTION_CRON};
use serde_json::json;

fn config() -> ReconcileConfig {
    ReconcileConfig {
        processor_id: "test-processor".to_string(),
        webhook_claim_ttl_seconds: 300,
        webhook_max_attempts: 8,
        stripe_retry_batch_size: 200,
        stripe_grace_batch_size: 500,
        billing_grace_days: 7,
        catalog_env: None,
        catalog_sync_cron: "*/15 * * * *".to_string(),
        catalog_sync_enabled: true,
    }
}

/// A `completed` webhook row older than 30 days is purged by the retention
/// tick; a recently completed row survives (spec §4.9 retention tick).
///
/// DB-backed test, skipped if GATEKIT_DATABASE_URL is not set.
#[tokio::test]
async fn retention_tick_purges_only_stale_completed_rows() -> anyhow::Result<()> {
    let url = match std::env::var(gatekit_db::ENV_DATABASE_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: GATEKIT_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = gatekit_db::connect(&url).await?;
    gatekit_db::migrate(&pool).await?;

    let stale_id = format!("evt_stale_{}", uuid::Uuid::new_v4());
    let fresh_id = format!("evt_fresh_{}", uuid::Uuid::new_v4());

    gatekit_db::webhooks::insert_pending(&pool, &stale_id, "customer.deleted", &json!({})).await?;
    gatekit_db::webhooks::insert_pending(&pool, &fresh_id, "customer.deleted", &json!({})).await?;

    let stale_row: (uuid::Uuid,) = sqlx::query_as("select id from webhook_events where external_event_id = $1")
        .bind(&stale_id)
        .fetch_one(&pool)
        .await?;
    let fresh_row: (uuid::Uuid,) = sqlx::query_as("select id from webhook_events where external_event_id = $1")
        .bind(&fresh_id)
        .fetch_one(&pool)
        .await?;

    gatekit_db::webhooks::mark_completed(&pool, stale_row.0).await?;
    gatekit_db::webhooks::mark_completed(&pool, fresh_row.0).await?;

    let old_processed_at = Utc::now() - Duration::days(31);
    sqlx::query("update webhook_events set processed_at = $2 where id = $1")
        .bind(stale_row.0)
        .bind(old_processed_at)
        .execute(&pool)
        .await?;

    let billing = FakeBillingClient::new();
    let report = gatekit_reconcile::run_tick(&pool, &billing, &config(), RETENTION_CRON).await?;

    match report {
        TickReport::Retention(r) => assert_eq!(r.purged, 1),
        other => panic!("expected Retention report, got {other:?}"),
    }

    let remaining: Vec<(uuid::Uuid,)> =
        sqlx::query_as("select id from webhook_events where external_event_id in ($1, $2)")
            .bind(&stale_id)
            .bind(&fresh_id)
            .fetch_all(&pool)
            .await?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].0, fresh_row.0);

    Ok(())
}

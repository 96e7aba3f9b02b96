//! One-shot reconciler entry point.
//!
//! Scheduled jobs are not cron-in-process (spec §9): an external scheduler
//! (system cron, a k8s `CronJob`, etc.) invokes this binary once per tick,
//! passing the cron expression that just fired as the sole argument. The
//! process runs exactly one [`gatekit_reconcile::run_tick`] and exits —
//! there is no long-lived scheduling loop to keep alive here.

use anyhow::Context;
use gatekit_reconcile::{ReconcileConfig, TickReport};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cron_expression = std::env::args()
        .nth(1)
        .context("usage: gatekit-reconcile <cron-expression>")?;

    let config = gatekit_config::AppConfig::from_env().context("loading configuration")?;
    let pool = gatekit_db::connect(config.database_url.expose()).await?;

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("building HTTP client")?;
    let billing = gatekit_billing::stripe_client::StripeClient::new(http, config.stripe_secret_key.expose().to_string());

    let reconcile_config = ReconcileConfig {
        processor_id: processor_id(),
        webhook_claim_ttl_seconds: config.stripe_webhook_claim_ttl_seconds,
        webhook_max_attempts: gatekit_webhook::DEFAULT_MAX_ATTEMPTS,
        stripe_retry_batch_size: config.stripe_retry_batch_size,
        stripe_grace_batch_size: config.stripe_grace_batch_size,
        billing_grace_days: config.billing_grace_days,
        catalog_env: config.stripe_catalog_env.clone(),
        catalog_sync_cron: config.stripe_catalog_sync_cron.clone(),
        catalog_sync_enabled: config.stripe_catalog_sync_enabled,
    };

    let report = gatekit_reconcile::run_tick(&pool, &billing, &reconcile_config, &cron_expression).await?;
    info!(cron = %cron_expression, report = ?report, "reconcile tick complete");
    print_report(&report);

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

fn processor_id() -> String {
    std::env::var("GATEKIT_RECONCILE_PROCESSOR_ID").unwrap_or_else(|_| format!("gatekit-reconcile-{}", std::process::id()))
}

fn print_report(report: &TickReport) {
    match serde_json::to_string(&tick_report_json(report)) {
        Ok(json) => println!("{json}"),
        Err(_) => println!("{report:?}"),
    }
}

fn tick_report_json(report: &TickReport) -> serde_json::Value {
    use serde_json::json;
    match report {
        TickReport::Retry(r) => json!({"kind": "retry", "selected": r.selected, "completed": r.completed, "failed": r.failed, "not_claimed": r.not_claimed}),
        TickReport::Grace(r) => json!({"kind": "grace", "expired": r.expired}),
        TickReport::Catalog(r) => json!({
            "kind": "catalog",
            "scanned_prices": r.scanned_prices,
            "eligible_prices": r.eligible_prices,
            "updated_variants": r.updated_variants,
            "missing_variants": r.missing_variants,
        }),
        TickReport::Retention(r) => json!({"kind": "retention", "purged": r.purged}),
        TickReport::Fallback { retry, grace, catalog, retention } => json!({
            "kind": "fallback",
            "retry": {"selected": retry.selected, "completed": retry.completed, "failed": retry.failed, "not_claimed": retry.not_claimed},
            "grace": {"expired": grace.expired},
            "catalog": {
                "scanned_prices": catalog.scanned_prices,
                "eligible_prices": catalog.eligible_prices,
                "updated_variants": catalog.updated_variants,
                "missing_variants": catalog.missing_variants,
            },
            "retention": {"purged": retention.purged},
        }),
    }
}

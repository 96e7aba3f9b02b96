//! C10 — Catalog sync: map the upstream active recurring price list onto
//! local `plan_variants` rows (spec §4.10).

use std::collections::HashMap;

use gatekit_db::catalog as catalog_db;
use gatekit_schemas::{BillingInterval, PlanSlug};

use crate::client::{BillingClient, BillingError, ProviderPrice};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogSyncReport {
    pub scanned_prices: usize,
    pub eligible_prices: usize,
    pub updated_variants: usize,
    pub missing_variants: usize,
}

/// Self-serve plan/interval combinations a healthy catalog should cover.
/// `free` has no upstream price and `enterprise` is contact-sales only
/// (spec §1 non-goals), so neither counts toward `missing_variants`.
const EXPECTED_SELF_SERVE: [(PlanSlug, BillingInterval); 4] = [
    (PlanSlug::Pro, BillingInterval::Monthly),
    (PlanSlug::Pro, BillingInterval::Yearly),
    (PlanSlug::Business, BillingInterval::Monthly),
    (PlanSlug::Business, BillingInterval::Yearly),
];

/// Run a full catalog sync. `catalog_env`, when set, restricts lookup-key
/// matches to that env segment; `None` accepts any env.
pub async fn sync_catalog(
    pool: &sqlx::PgPool,
    billing: &dyn BillingClient,
    catalog_env: Option<&str>,
) -> Result<CatalogSyncReport, BillingError> {
    let prices = billing.list_active_recurring_prices().await?;
    let scanned_prices = prices.len();

    let mut winners: HashMap<(PlanSlug, BillingInterval), &ProviderPrice> = HashMap::new();
    for price in &prices {
        let Some(key) = classify_price(price, catalog_env) else {
            continue;
        };
        match winners.get(&key) {
            Some(existing) if existing.created >= price.created => {}
            _ => {
                winners.insert(key, price);
            }
        }
    }
    let eligible_prices = winners.len();

    let mut seen_price_ids = Vec::with_capacity(winners.len());
    let mut updated_variants = 0usize;

    for ((plan_slug, interval), price) in &winners {
        seen_price_ids.push(price.id.clone());
        let existing = catalog_db::find_by_upstream_price_id(pool, &price.id).await?;
        let amount_cents = price.unit_amount.unwrap_or(0);

        let changed = match &existing {
            Some(row) => {
                row.amount_cents != amount_cents
                    || row.currency != price.currency
                    || row.plan_slug != *plan_slug
                    || row.interval != *interval
            }
            None => true,
        };

        if changed {
            let trial_period_days = existing.map(|row| row.trial_period_days).unwrap_or(0);
            catalog_db::upsert(
                pool,
                *plan_slug,
                *interval,
                &price.currency,
                &price.id,
                amount_cents,
                trial_period_days,
            )
            .await?;
            updated_variants += 1;
        }
    }

    catalog_db::deactivate_missing(pool, &seen_price_ids).await?;

    let missing_variants = EXPECTED_SELF_SERVE
        .iter()
        .filter(|combo| !winners.contains_key(combo))
        .count();

    Ok(CatalogSyncReport {
        scanned_prices,
        eligible_prices,
        updated_variants,
        missing_variants,
    })
}

/// Decide whether a price is an eligible self-serve catalog candidate and,
/// if so, which `(plan_slug, interval)` it represents. `self_serve="false"`
/// in metadata vetoes the price outright, even when its lookup key would
/// otherwise match (spec §4.10).
fn classify_price(price: &ProviderPrice, catalog_env: Option<&str>) -> Option<(PlanSlug, BillingInterval)> {
    if !price.currency.eq_ignore_ascii_case("usd") {
        return None;
    }
    let amount = price.unit_amount?;
    if amount < 0 {
        return None;
    }
    let derived_interval = match price.recurring_interval.as_deref() {
        Some("month") => BillingInterval::Monthly,
        Some("year") => BillingInterval::Yearly,
        _ => return None,
    };

    if price.metadata.get("self_serve").and_then(|v| v.as_str()) == Some("false") {
        return None;
    }

    if let Some(m) = lookup_key_match(price, catalog_env, derived_interval) {
        return Some(m);
    }

    metadata_match(price, derived_interval)
}

fn lookup_key_match(
    price: &ProviderPrice,
    catalog_env: Option<&str>,
    derived_interval: BillingInterval,
) -> Option<(PlanSlug, BillingInterval)> {
    let key = price.lookup_key.as_deref()?;
    let parts: Vec<&str> = key.split(':').collect();
    if parts.len() != 5 || parts[0] != "formsandbox" || parts[4] != "usd" {
        return None;
    }
    if let Some(expected_env) = catalog_env {
        if parts[1] != expected_env {
            return None;
        }
    }
    let plan_slug = PlanSlug::parse(parts[2])?;
    let interval = BillingInterval::parse(parts[3])?;
    if interval != derived_interval {
        return None;
    }
    Some((plan_slug, interval))
}

fn metadata_match(price: &ProviderPrice, derived_interval: BillingInterval) -> Option<(PlanSlug, BillingInterval)> {
    let plan_slug = PlanSlug::parse(price.metadata.get("plan_slug")?.as_str()?)?;
    if !matches!(plan_slug, PlanSlug::Pro | PlanSlug::Business) {
        return None;
    }
    let interval = BillingInterval::parse(price.metadata.get("interval")?.as_str()?)?;
    if interval != derived_interval {
        return None;
    }
    if price.metadata.get("self_serve").and_then(|v| v.as_str()) != Some("true") {
        return None;
    }
    Some((plan_slug, interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn price(
        currency: &str,
        unit_amount: Option<i64>,
        interval: Option<&str>,
        lookup_key: Option<&str>,
        metadata: serde_json::Value,
    ) -> ProviderPrice {
        ProviderPrice {
            id: "price_1".to_string(),
            currency: currency.to_string(),
            unit_amount,
            recurring_interval: interval.map(str::to_string),
            lookup_key: lookup_key.map(str::to_string),
            metadata,
            active: true,
            created: 1_700_000_000,
        }
    }

    #[test]
    fn lookup_key_takes_precedence_over_metadata() {
        let p = price(
            "usd",
            Some(1000),
            Some("month"),
            Some("formsandbox:prod:pro:monthly:usd"),
            json!({ "plan_slug": "business", "interval": "monthly", "self_serve": "true" }),
        );
        assert_eq!(
            classify_price(&p, Some("prod")),
            Some((PlanSlug::Pro, BillingInterval::Monthly))
        );
    }

    #[test]
    fn lookup_key_env_mismatch_falls_back_to_metadata() {
        let p = price(
            "usd",
            Some(1000),
            Some("month"),
            Some("formsandbox:staging:pro:monthly:usd"),
            json!({ "plan_slug": "business", "interval": "monthly", "self_serve": "true" }),
        );
        assert_eq!(
            classify_price(&p, Some("prod")),
            Some((PlanSlug::Business, BillingInterval::Monthly))
        );
    }

    #[test]
    fn self_serve_false_vetoes_even_a_matching_lookup_key() {
        let p = price(
            "usd",
            Some(1000),
            Some("month"),
            Some("formsandbox:prod:pro:monthly:usd"),
            json!({ "self_serve": "false" }),
        );
        assert_eq!(classify_price(&p, Some("prod")), None);
    }

    #[test]
    fn non_usd_price_is_ineligible() {
        let p = price("eur", Some(1000), Some("month"), None, json!({}));
        assert_eq!(classify_price(&p, None), None);
    }

    #[test]
    fn metadata_without_self_serve_true_is_ineligible() {
        let p = price(
            "usd",
            Some(1000),
            Some("year"),
            None,
            json!({ "plan_slug": "pro", "interval": "yearly" }),
        );
        assert_eq!(classify_price(&p, None), None);
    }
}

//! C8 — Event processor: map upstream billing events to subscription state
//! and keep the denormalized plan cache in sync (spec §4.8).

use chrono::{Duration, Utc};
use gatekit_db::{catalog as catalog_db, customers as customers_db, subscriptions as subscriptions_db};
use gatekit_schemas::{PlanSlug, SubscriptionStatus};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::catalog::sync_catalog;
use crate::client::{BillingClient, BillingError, ProviderSubscription};

fn object(payload: &Value) -> Result<&Value, BillingError> {
    payload
        .get("data")
        .and_then(|d| d.get("object"))
        .ok_or_else(|| BillingError::UnexpectedResponse("webhook payload missing data.object".to_string()))
}

fn str_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(|v| v.as_str())
}

/// Dispatch one webhook event's payload to the matching handler. `event_id`
/// is the upstream event id, threaded through for the `webhook_deleted`
/// audit record.
pub async fn apply_event(
    pool: &PgPool,
    billing: &dyn BillingClient,
    catalog_env: Option<&str>,
    billing_grace_days: i64,
    event_id: &str,
    event_type: &str,
    payload: &Value,
) -> Result<(), BillingError> {
    match event_type {
        "checkout.session.completed" => handle_checkout_session_completed(pool, billing, catalog_env, payload).await,
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => handle_subscription_event(pool, billing, catalog_env, payload).await,
        "customer.deleted" => handle_customer_deleted(pool, event_id, payload).await,
        "invoice.payment_failed" => handle_invoice_payment_failed(pool, billing_grace_days, payload).await,
        "invoice.paid" => handle_invoice_paid(pool, payload).await,
        other => {
            tracing::debug!(event_type = other, "ignoring unhandled webhook event type");
            Ok(())
        }
    }
}

async fn handle_checkout_session_completed(
    pool: &PgPool,
    billing: &dyn BillingClient,
    catalog_env: Option<&str>,
    payload: &Value,
) -> Result<(), BillingError> {
    let obj = object(payload)?;
    if str_field(obj, "mode") != Some("subscription") {
        return Ok(());
    }
    let subscription_id = str_field(obj, "subscription")
        .ok_or_else(|| BillingError::UnexpectedResponse("checkout session missing subscription id".to_string()))?;

    let workspace_hint = str_field(obj, "client_reference_id").and_then(|s| Uuid::parse_str(s).ok());
    let subscription = billing.retrieve_subscription(subscription_id).await?;
    sync_subscription(pool, billing, catalog_env, &subscription, workspace_hint).await
}

async fn handle_subscription_event(
    pool: &PgPool,
    billing: &dyn BillingClient,
    catalog_env: Option<&str>,
    payload: &Value,
) -> Result<(), BillingError> {
    let obj = object(payload)?;
    let subscription_id = str_field(obj, "id")
        .ok_or_else(|| BillingError::UnexpectedResponse("subscription event missing object id".to_string()))?;
    let workspace_hint = obj
        .get("metadata")
        .and_then(|m| m.get("workspace_id"))
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok());

    let subscription = billing.retrieve_subscription(subscription_id).await?;
    sync_subscription(pool, billing, catalog_env, &subscription, workspace_hint).await
}

async fn handle_customer_deleted(pool: &PgPool, event_id: &str, payload: &Value) -> Result<(), BillingError> {
    let obj = object(payload)?;
    let customer_id = str_field(obj, "id")
        .ok_or_else(|| BillingError::UnexpectedResponse("customer.deleted missing object id".to_string()))?;

    let affected_workspaces = customers_db::delete_by_customer_id(pool, customer_id).await?;
    let now = Utc::now();
    let canceled_workspaces = subscriptions_db::cancel_all_for_customer(pool, customer_id, now).await?;

    let mut workspaces: Vec<Uuid> = affected_workspaces;
    for ws in canceled_workspaces {
        if !workspaces.contains(&ws) {
            workspaces.push(ws);
        }
    }

    for workspace_id in workspaces {
        gatekit_db::rpc::ensure_free_subscription_for_workspace(pool, workspace_id, "customer.deleted").await?;
        refresh_plan_cache(pool, workspace_id).await?;
        gatekit_audit::record(
            pool,
            workspace_id,
            gatekit_schemas::BillingCustomerEventType::WebhookDeleted,
            Some(customer_id),
            None,
            Some("customer.deleted webhook"),
            Some(event_id),
        )
        .await?;
    }

    Ok(())
}

async fn handle_invoice_payment_failed(
    pool: &PgPool,
    billing_grace_days: i64,
    payload: &Value,
) -> Result<(), BillingError> {
    let obj = object(payload)?;
    let Some(subscription_id) = str_field(obj, "subscription") else {
        return Ok(());
    };
    let grace_period_end = Utc::now() + Duration::days(billing_grace_days);
    subscriptions_db::set_grace_period_end(pool, subscription_id, Some(grace_period_end)).await?;
    Ok(())
}

async fn handle_invoice_paid(pool: &PgPool, payload: &Value) -> Result<(), BillingError> {
    let obj = object(payload)?;
    let Some(subscription_id) = str_field(obj, "subscription") else {
        return Ok(());
    };
    subscriptions_db::set_grace_period_end(pool, subscription_id, None).await?;
    Ok(())
}

/// The subscription-sync algorithm shared by checkout-session completion and
/// the direct `customer.subscription.*` events (spec §4.8 steps 1-5).
async fn sync_subscription(
    pool: &PgPool,
    billing: &dyn BillingClient,
    catalog_env: Option<&str>,
    subscription: &ProviderSubscription,
    workspace_hint: Option<Uuid>,
) -> Result<(), BillingError> {
    let existing = subscriptions_db::find_by_upstream_id(pool, &subscription.id).await?;

    let workspace_id = resolve_workspace_id(pool, subscription, workspace_hint, existing.as_ref()).await?;
    let status = SubscriptionStatus::from_upstream(&subscription.status);

    let price_id = subscription.items.first().map(|item| item.price_id.as_str());
    let (plan_slug, plan_variant_id) = resolve_plan_variant(pool, billing, catalog_env, price_id, existing.as_ref()).await?;

    match &existing {
        Some(row) => {
            subscriptions_db::update(
                pool,
                row.id,
                plan_slug,
                plan_variant_id,
                status,
                Some(&subscription.id),
                Some(&subscription.customer_id),
                subscription.current_period_start,
                subscription.current_period_end,
                subscription.trial_start,
                subscription.trial_end,
                subscription.cancel_at_period_end,
                subscription.canceled_at,
                subscription.ended_at,
                &subscription.metadata,
            )
            .await?;
        }
        None if status.is_entitled() => {
            match subscriptions_db::find_latest_entitled_for_workspace(pool, workspace_id).await? {
                Some(row) => {
                    subscriptions_db::update(
                        pool,
                        row.id,
                        plan_slug,
                        plan_variant_id,
                        status,
                        Some(&subscription.id),
                        Some(&subscription.customer_id),
                        subscription.current_period_start,
                        subscription.current_period_end,
                        subscription.trial_start,
                        subscription.trial_end,
                        subscription.cancel_at_period_end,
                        subscription.canceled_at,
                        subscription.ended_at,
                        &subscription.metadata,
                    )
                    .await?;
                }
                None => {
                    subscriptions_db::insert(
                        pool,
                        workspace_id,
                        plan_slug,
                        plan_variant_id,
                        status,
                        Some(&subscription.id),
                        Some(&subscription.customer_id),
                        subscription.current_period_start,
                        subscription.current_period_end,
                        subscription.trial_start,
                        subscription.trial_end,
                        subscription.cancel_at_period_end,
                        subscription.canceled_at,
                        subscription.ended_at,
                        &subscription.metadata,
                    )
                    .await?;
                }
            }
        }
        None => {
            subscriptions_db::insert(
                pool,
                workspace_id,
                plan_slug,
                plan_variant_id,
                status,
                Some(&subscription.id),
                Some(&subscription.customer_id),
                subscription.current_period_start,
                subscription.current_period_end,
                subscription.trial_start,
                subscription.trial_end,
                subscription.cancel_at_period_end,
                subscription.canceled_at,
                subscription.ended_at,
                &subscription.metadata,
            )
            .await?;
        }
    }

    if status.is_nonentitled_terminal() {
        gatekit_db::rpc::ensure_free_subscription_for_workspace(pool, workspace_id, "subscription_sync").await?;
    }

    refresh_plan_cache(pool, workspace_id).await?;
    Ok(())
}

async fn resolve_workspace_id(
    pool: &PgPool,
    subscription: &ProviderSubscription,
    workspace_hint: Option<Uuid>,
    existing: Option<&gatekit_schemas::SubscriptionRow>,
) -> Result<Uuid, BillingError> {
    if let Some(hint) = workspace_hint {
        return Ok(hint);
    }
    if let Some(row) = existing {
        return Ok(row.workspace_id);
    }
    if let Some(mapping) = customers_db::find_by_customer_id(pool, &subscription.customer_id).await? {
        return Ok(mapping.workspace_id);
    }
    if let Some(row) = subscriptions_db::find_by_customer_id(pool, &subscription.customer_id).await? {
        return Ok(row.workspace_id);
    }
    Err(BillingError::UnexpectedResponse(format!(
        "could not resolve a workspace for upstream subscription {}",
        subscription.id
    )))
}

async fn resolve_plan_variant(
    pool: &PgPool,
    billing: &dyn BillingClient,
    catalog_env: Option<&str>,
    price_id: Option<&str>,
    existing: Option<&gatekit_schemas::SubscriptionRow>,
) -> Result<(PlanSlug, Option<Uuid>), BillingError> {
    let Some(price_id) = price_id else {
        return fallback_to_existing_variant(existing);
    };

    if let Some(variant) = catalog_db::find_by_upstream_price_id(pool, price_id).await? {
        return Ok((variant.plan_slug, Some(variant.id)));
    }

    sync_catalog(pool, billing, catalog_env).await?;

    if let Some(variant) = catalog_db::find_by_upstream_price_id(pool, price_id).await? {
        return Ok((variant.plan_slug, Some(variant.id)));
    }

    fallback_to_existing_variant(existing)
}

fn fallback_to_existing_variant(
    existing: Option<&gatekit_schemas::SubscriptionRow>,
) -> Result<(PlanSlug, Option<Uuid>), BillingError> {
    match existing {
        Some(row) => Ok((row.plan, row.plan_variant_id)),
        None => Err(BillingError::CatalogOutOfSync),
    }
}

/// Pick the latest entitled subscription's plan slug, or `free` if none,
/// and write it to the denormalized `workspaces.plan` cache (spec §4.8
/// step 5, §3.3 invariant 5).
async fn refresh_plan_cache(pool: &PgPool, workspace_id: Uuid) -> Result<(), BillingError> {
    let plan = subscriptions_db::find_latest_entitled_for_workspace(pool, workspace_id)
        .await?
        .map(|row| row.plan)
        .unwrap_or(PlanSlug::Free);
    subscriptions_db::refresh_workspace_plan_cache(pool, workspace_id, plan).await?;
    Ok(())
}

//! C6 — Customer mapping recovery.
//!
//! Keeps `workspace_billing_customers` pointed at a live upstream customer,
//! self-healing when the mapped id has been deleted or gone missing upstream
//! (spec §4.6). Every transition is logged through `gatekit-audit` before the
//! mapping row itself changes, so the audit trail never claims a transition
//! that didn't happen.

use std::future::Future;

use gatekit_db::customers as customers_db;
use gatekit_schemas::BillingCustomerEventType;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::client::{is_missing_customer, BillingClient, BillingError, CreateCustomerRequest};
use crate::fingerprint::customer_idempotency_key;

/// Which of the two recovery branches produced the returned customer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    Validated,
    Recreated,
}

/// `resolveOrCreate` (spec §4.6): validate the existing mapping if one
/// exists, recreating it if the upstream customer is gone; otherwise create
/// one from scratch. Never returns a customer id it hasn't just confirmed
/// (or just created) is live.
pub async fn resolve_or_create(
    pool: &PgPool,
    billing: &dyn BillingClient,
    workspace_id: Uuid,
    scope: &str,
) -> Result<(String, ResolveStatus), BillingError> {
    if let Some(existing) = customers_db::load(pool, workspace_id).await? {
        match billing.retrieve_customer(&existing.customer_id).await {
            Ok(Some(customer)) if !customer.deleted => {
                return Ok((existing.customer_id, ResolveStatus::Validated));
            }
            Ok(_) => {
                invalidate(pool, workspace_id, &existing.customer_id, "deleted_upstream").await?;
            }
            Err(e) if is_missing_customer(&e, &existing.customer_id) => {
                invalidate(pool, workspace_id, &existing.customer_id, "resource_missing").await?;
            }
            Err(e) => return Err(e),
        }
    }

    create_and_map(pool, billing, workspace_id, scope).await
}

async fn create_and_map(
    pool: &PgPool,
    billing: &dyn BillingClient,
    workspace_id: Uuid,
    scope: &str,
) -> Result<(String, ResolveStatus), BillingError> {
    let idempotency_key = customer_idempotency_key(workspace_id, scope);
    let customer = billing
        .create_customer(CreateCustomerRequest {
            idempotency_key,
            email: None,
            metadata: json!({ "workspace_id": workspace_id.to_string() }),
        })
        .await?;

    customers_db::upsert(pool, workspace_id, &customer.id).await?;
    gatekit_audit::record(
        pool,
        workspace_id,
        BillingCustomerEventType::Recreated,
        None,
        Some(&customer.id),
        Some("customer_created"),
        None,
    )
    .await?;

    Ok((customer.id, ResolveStatus::Recreated))
}

async fn invalidate(
    pool: &PgPool,
    workspace_id: Uuid,
    customer_id: &str,
    reason: &str,
) -> Result<(), BillingError> {
    customers_db::delete(pool, workspace_id).await?;
    gatekit_audit::record(
        pool,
        workspace_id,
        BillingCustomerEventType::Invalidated,
        Some(customer_id),
        None,
        Some(reason),
        None,
    )
    .await?;
    Ok(())
}

/// `withRecoveredCustomer` (spec §4.6): resolve a customer id (preferring a
/// caller-supplied one, validated before use), run `execute` against it, and
/// on a single "no such customer" failure invalidate, recreate under a
/// retry-scoped idempotency key, and run `execute` exactly once more. A
/// second failure is wrapped so the caller can surface a correlation id
/// without leaking the underlying upstream error.
pub async fn with_recovered_customer<T, F, Fut>(
    pool: &PgPool,
    billing: &dyn BillingClient,
    workspace_id: Uuid,
    scope: &str,
    correlation_id: Uuid,
    preferred: Option<&str>,
    execute: F,
) -> Result<T, BillingError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, BillingError>>,
{
    let customer_id = match preferred {
        Some(preferred_id) => match billing.retrieve_customer(preferred_id).await {
            Ok(Some(customer)) if !customer.deleted => {
                customers_db::upsert(pool, workspace_id, preferred_id).await?;
                gatekit_audit::record(
                    pool,
                    workspace_id,
                    BillingCustomerEventType::Validated,
                    None,
                    Some(preferred_id),
                    Some("preferred_customer_validated"),
                    None,
                )
                .await?;
                preferred_id.to_string()
            }
            Ok(_) => {
                invalidate(pool, workspace_id, preferred_id, "preferred_customer_deleted").await?;
                resolve_or_create(pool, billing, workspace_id, scope).await?.0
            }
            Err(e) if is_missing_customer(&e, preferred_id) => {
                invalidate(pool, workspace_id, preferred_id, "preferred_customer_missing").await?;
                resolve_or_create(pool, billing, workspace_id, scope).await?.0
            }
            Err(e) => return Err(e),
        },
        None => resolve_or_create(pool, billing, workspace_id, scope).await?.0,
    };

    match execute(customer_id.clone()).await {
        Ok(value) => Ok(value),
        Err(e) if is_missing_customer(&e, &customer_id) => {
            invalidate(pool, workspace_id, &customer_id, "execute_reported_missing_customer").await?;
            let retry_scope = format!("{scope}:retry:{correlation_id}");
            let (retried_id, _) = resolve_or_create(pool, billing, workspace_id, &retry_scope).await?;
            execute(retried_id).await.map_err(|source| BillingError::RecoveryFailed {
                correlation_id,
                source: Box::new(source),
            })
        }
        Err(e) => Err(e),
    }
}

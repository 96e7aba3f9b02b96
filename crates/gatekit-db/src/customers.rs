//! Directly-owned `workspace_billing_customers` table (C6).

use gatekit_schemas::WorkspaceBillingCustomerRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::DbError;

pub async fn load(
    pool: &PgPool,
    workspace_id: Uuid,
) -> Result<Option<WorkspaceBillingCustomerRow>, DbError> {
    let row = sqlx::query("select workspace_id, customer_id from workspace_billing_customers where workspace_id = $1")
        .bind(workspace_id)
        .fetch_optional(pool)
        .await?;

    row.map(|r| {
        Ok(WorkspaceBillingCustomerRow {
            workspace_id: r.try_get("workspace_id")?,
            customer_id: r.try_get("customer_id")?,
        })
    })
    .transpose()
}

pub async fn upsert(pool: &PgPool, workspace_id: Uuid, customer_id: &str) -> Result<(), DbError> {
    sqlx::query(
        r#"
        insert into workspace_billing_customers (workspace_id, customer_id)
        values ($1, $2)
        on conflict (workspace_id) do update set customer_id = excluded.customer_id
        "#,
    )
    .bind(workspace_id)
    .bind(customer_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Find the workspace mapped to an upstream customer id, if any. Used by
/// C8's subscription-sync workspace resolution fallback chain (spec §4.8
/// step 1).
pub async fn find_by_customer_id(
    pool: &PgPool,
    customer_id: &str,
) -> Result<Option<WorkspaceBillingCustomerRow>, DbError> {
    let row = sqlx::query("select workspace_id, customer_id from workspace_billing_customers where customer_id = $1")
        .bind(customer_id)
        .fetch_optional(pool)
        .await?;

    row.map(|r| {
        Ok(WorkspaceBillingCustomerRow {
            workspace_id: r.try_get("workspace_id")?,
            customer_id: r.try_get("customer_id")?,
        })
    })
    .transpose()
}

pub async fn delete(pool: &PgPool, workspace_id: Uuid) -> Result<(), DbError> {
    sqlx::query("delete from workspace_billing_customers where workspace_id = $1")
        .bind(workspace_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete every mapping row for a deleted upstream customer id, returning
/// the affected workspace ids (spec §4.8 `customer.deleted` handling).
pub async fn delete_by_customer_id(pool: &PgPool, customer_id: &str) -> Result<Vec<Uuid>, DbError> {
    let rows = sqlx::query(
        "delete from workspace_billing_customers where customer_id = $1 returning workspace_id",
    )
    .bind(customer_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| Ok(r.try_get::<Uuid, _>("workspace_id")?))
        .collect()
}

//! Postgres access layer.
//!
//! Mirrors the teacher's `mqk-db` shape: a thin `connect_from_env` + embedded
//! `migrate`, then a set of typed async functions taking `&PgPool`. Split
//! into `rpc` (opaque database-collaborator functions, §6.2) and the
//! directly-owned billing tables (`checkout`, `customers`, `webhooks`,
//! `subscriptions`, `catalog`) whose schema spec.md §3.1 fully specifies.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub mod catalog;
pub mod checkout;
pub mod customers;
pub mod rpc;
pub mod subscriptions;
pub mod webhooks;

pub const ENV_DATABASE_URL: &str = "GATEKIT_DATABASE_URL";

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited")]
    RateLimited,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Connect to Postgres using the configured connection string.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

/// Run embedded SQLx migrations for the tables this crate owns directly.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Readiness probe: a trivial round trip, used by `GET /api/v1/readyz`.
pub async fn ping(pool: &PgPool) -> Result<()> {
    sqlx::query_scalar::<_, i32>("select 1")
        .fetch_one(pool)
        .await
        .context("readiness ping failed")?;
    Ok(())
}

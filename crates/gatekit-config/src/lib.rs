//! Environment-sourced runtime configuration.
//!
//! `AppConfig::from_env` is the single place that reads `std::env::var`.
//! Everything downstream receives an already-parsed, already-defaulted
//! `AppConfig` — no crate other than this one should call `std::env::var`
//! directly.

use std::time::Duration;

pub mod secrets;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("env var {name} has invalid value: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// All environment-derived configuration for one process instance.
#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,

    /// Direct Postgres connection string for `sqlx`, distinct from the
    /// Supabase REST endpoint below (matches the teacher's `MQK_DATABASE_URL`
    /// convention of keeping the driver's own DSN separate from any
    /// higher-level client URL).
    pub database_url: secrets::Secret,

    pub supabase_url: String,
    pub supabase_anon_key: secrets::Secret,
    pub supabase_service_role_key: secrets::Secret,

    pub stripe_secret_key: secrets::Secret,
    pub stripe_webhook_signing_secret: secrets::Secret,

    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    pub billing_portal_return_url: String,
    pub contact_sales_url: String,
    /// Surfaced in `PLAN_FEATURE_DISABLED`/`PLAN_LIMIT_EXCEEDED` bodies (spec
    /// §4.4 step 7). `get_form_submission_quota` doesn't return this — it's
    /// a static marketing link, not per-workspace data — so it's configured
    /// here the same way `contact_sales_url` is.
    pub plan_upgrade_url: String,

    pub billing_grace_days: i64,
    pub stripe_webhook_claim_ttl_seconds: i64,
    pub stripe_webhook_max_body_bytes: usize,
    pub stripe_retry_batch_size: i64,
    pub stripe_grace_batch_size: i64,
    pub stripe_catalog_sync_enabled: bool,
    pub stripe_catalog_sync_cron: String,
    pub stripe_catalog_env: Option<String>,
    pub stripe_internal_admin_token: Option<secrets::Secret>,

    pub request_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: env_or("GATEKIT_BIND_ADDR", "0.0.0.0:8080"),

            database_url: secrets::Secret::new(required_env("GATEKIT_DATABASE_URL")?),

            supabase_url: required_env("SUPABASE_URL")?,
            supabase_anon_key: secrets::Secret::new(required_env("SUPABASE_ANON_KEY")?),
            supabase_service_role_key: secrets::Secret::new(required_env(
                "SUPABASE_SERVICE_ROLE_KEY",
            )?),

            stripe_secret_key: secrets::Secret::new(required_env("STRIPE_SECRET_KEY")?),
            stripe_webhook_signing_secret: secrets::Secret::new(required_env(
                "STRIPE_WEBHOOK_SIGNING_SECRET",
            )?),

            checkout_success_url: required_env("CHECKOUT_SUCCESS_URL")?,
            checkout_cancel_url: required_env("CHECKOUT_CANCEL_URL")?,
            billing_portal_return_url: required_env("BILLING_PORTAL_RETURN_URL")?,
            contact_sales_url: env_or("CONTACT_SALES_URL", "https://example.com/contact-sales"),
            plan_upgrade_url: env_or("PLAN_UPGRADE_URL", "https://example.com/pricing"),

            billing_grace_days: parse_env_or("BILLING_GRACE_DAYS", 7)?,
            stripe_webhook_claim_ttl_seconds: parse_env_or(
                "STRIPE_WEBHOOK_CLAIM_TTL_SECONDS",
                300,
            )?,
            stripe_webhook_max_body_bytes: parse_env_or("STRIPE_WEBHOOK_MAX_BODY_BYTES", 262_144)?,
            stripe_retry_batch_size: parse_env_or("STRIPE_RETRY_BATCH_SIZE", 200)?,
            stripe_grace_batch_size: parse_env_or("STRIPE_GRACE_BATCH_SIZE", 500)?,
            stripe_catalog_sync_enabled: parse_bool_env_or("STRIPE_CATALOG_SYNC_ENABLED", true)?,
            stripe_catalog_sync_cron: env_or("STRIPE_CATALOG_SYNC_CRON", "*/15 * * * *"),
            stripe_catalog_env: std::env::var("STRIPE_CATALOG_ENV").ok(),
            stripe_internal_admin_token: std::env::var("STRIPE_INTERNAL_ADMIN_TOKEN")
                .ok()
                .map(secrets::Secret::new),

            request_timeout: Duration::from_secs(parse_env_or(
                "GATEKIT_REQUEST_TIMEOUT_SECONDS",
                10,
            )?),
        })
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_url", &self.database_url)
            .field("supabase_url", &self.supabase_url)
            .field("supabase_anon_key", &self.supabase_anon_key)
            .field("supabase_service_role_key", &self.supabase_service_role_key)
            .field("stripe_secret_key", &self.stripe_secret_key)
            .field(
                "stripe_webhook_signing_secret",
                &self.stripe_webhook_signing_secret,
            )
            .field("checkout_success_url", &self.checkout_success_url)
            .field("checkout_cancel_url", &self.checkout_cancel_url)
            .field(
                "billing_portal_return_url",
                &self.billing_portal_return_url,
            )
            .field("contact_sales_url", &self.contact_sales_url)
            .field("plan_upgrade_url", &self.plan_upgrade_url)
            .field("billing_grace_days", &self.billing_grace_days)
            .field(
                "stripe_webhook_claim_ttl_seconds",
                &self.stripe_webhook_claim_ttl_seconds,
            )
            .field(
                "stripe_webhook_max_body_bytes",
                &self.stripe_webhook_max_body_bytes,
            )
            .field("stripe_retry_batch_size", &self.stripe_retry_batch_size)
            .field("stripe_grace_batch_size", &self.stripe_grace_batch_size)
            .field(
                "stripe_catalog_sync_enabled",
                &self.stripe_catalog_sync_enabled,
            )
            .field("stripe_catalog_sync_cron", &self.stripe_catalog_sync_cron)
            .field("stripe_catalog_env", &self.stripe_catalog_env)
            .field(
                "stripe_internal_admin_token",
                &self.stripe_internal_admin_token,
            )
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn env_or(name: &'static str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("not a valid number: {v}"),
        }),
        _ => Ok(default),
    }
}

fn parse_bool_env_or(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => {
            let v = v.trim().to_ascii_lowercase();
            match v.as_str() {
                "1" | "true" | "yes" => Ok(true),
                "0" | "false" | "no" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    name,
                    reason: format!("not a valid boolean: {v}"),
                }),
            }
        }
        _ => Ok(default),
    }
}

//! The single seam between billing domain logic and the upstream payment
//! provider (spec §9). Every other module in this crate talks to the
//! provider only through [`BillingClient`], the same way `mqk-execution`'s
//! `BrokerGateway` never talks to a broker except through `BrokerAdapter` —
//! so tests can swap in a fake and production wiring swaps in
//! [`crate::stripe_client::StripeClient`] without either side knowing.

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ProviderCustomer {
    pub id: String,
    pub deleted: bool,
}

#[derive(Debug, Clone)]
pub struct CreateCustomerRequest {
    pub idempotency_key: String,
    pub email: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub idempotency_key: String,
    pub customer_id: String,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    pub client_reference_id: String,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct ProviderSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ProviderSubscriptionItem {
    pub price_id: String,
}

#[derive(Debug, Clone)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer_id: String,
    pub status: String,
    pub items: Vec<ProviderSubscriptionItem>,
    pub current_period_start: Option<chrono::DateTime<chrono::Utc>>,
    pub current_period_end: Option<chrono::DateTime<chrono::Utc>>,
    pub trial_start: Option<chrono::DateTime<chrono::Utc>>,
    pub trial_end: Option<chrono::DateTime<chrono::Utc>>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct ProviderPrice {
    pub id: String,
    pub currency: String,
    pub unit_amount: Option<i64>,
    /// Stripe's own vocabulary: `"month"` / `"year"`, not this system's
    /// `BillingInterval`. Left as the raw string so the catalog-sync
    /// candidate rules in `catalog.rs` can apply spec §4.10's mapping.
    pub recurring_interval: Option<String>,
    pub lookup_key: Option<String>,
    pub metadata: Value,
    pub active: bool,
    pub created: i64,
}

/// Structured failure detail from the provider, kept loose enough to test
/// `is_missing_customer` without needing a live HTTP round trip.
#[derive(Debug, Clone, Default)]
pub struct ProviderErrorDetail {
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub param: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("upstream provider error: {0:?}")]
    Provider(ProviderErrorDetail),
    #[error("transport error talking to provider: {0}")]
    Transport(String),
    #[error("unexpected provider response: {0}")]
    UnexpectedResponse(String),
    #[error("catalog is out of sync with the provider")]
    CatalogOutOfSync,
    #[error("customer recovery failed for correlation {correlation_id}: {source}")]
    RecoveryFailed {
        correlation_id: uuid::Uuid,
        #[source]
        source: Box<BillingError>,
    },
    #[error(transparent)]
    Db(#[from] gatekit_db::DbError),
}

/// Matches the `resource_missing` shape the provider returns for a customer
/// id it no longer recognizes, per spec §4.6: `type=invalid_request_error ∧
/// code=resource_missing ∧ param=customer`, or a message mentioning the
/// known id alongside "No such customer" (some provider error paths omit
/// the structured fields and only populate `message`).
pub fn is_missing_customer(err: &BillingError, known_customer_id: &str) -> bool {
    let detail = match err {
        BillingError::Provider(detail) => detail,
        _ => return false,
    };

    let structured = detail.error_type.as_deref() == Some("invalid_request_error")
        && detail.code.as_deref() == Some("resource_missing")
        && detail.param.as_deref() == Some("customer");
    if structured {
        return true;
    }

    detail
        .message
        .as_deref()
        .map(|m| m.contains("No such customer") && m.contains(known_customer_id))
        .unwrap_or(false)
}

#[async_trait]
pub trait BillingClient: Send + Sync {
    async fn retrieve_customer(&self, id: &str) -> Result<Option<ProviderCustomer>, BillingError>;

    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<ProviderCustomer, BillingError>;

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<ProviderSession, BillingError>;

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<ProviderSession, BillingError>;

    async fn retrieve_subscription(&self, id: &str) -> Result<ProviderSubscription, BillingError>;

    async fn list_active_recurring_prices(&self) -> Result<Vec<ProviderPrice>, BillingError>;
}

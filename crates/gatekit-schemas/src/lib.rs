//! Shared DTOs passed between `gatekit-*` crates.
//!
//! Nothing here talks to the database or the network; these are plain
//! value types so that `gatekit-contract`, `gatekit-logic`,
//! `gatekit-validate`, `gatekit-billing`, `gatekit-webhook` and
//! `gatekit-daemon` can all depend on a single shared vocabulary without
//! depending on each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Form / submission
// ---------------------------------------------------------------------------

/// A published form row as returned by `get_published_form_by_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedForm {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub published_schema: Value,
    pub success_message: Option<String>,
    pub redirect_url: Option<String>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_image_url: Option<String>,
    pub captcha_enabled: bool,
    pub captcha_provider: Option<String>,
    pub require_auth: bool,
    pub password_protected: bool,
}

/// Caller identity and forwarded-request context, threaded explicitly
/// through the submission pipeline instead of living in ambient
/// task-local state (spec §9 redesign note).
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub correlation_id: Uuid,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub access_token: Option<String>,
}

/// Result of `submit_form`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub submission_id: Uuid,
}

/// Result of `get_form_submission_quota`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionQuota {
    pub feature_key: String,
    pub is_enabled: bool,
    pub limit_value: i64,
    pub current_usage: i64,
    pub workspace_id: Uuid,
}

/// One entitlement row from `get_workspace_entitlements`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceEntitlement {
    pub feature_key: String,
    pub is_enabled: bool,
    pub limit_value: i64,
}

// ---------------------------------------------------------------------------
// Billing enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

impl BillingInterval {
    pub fn as_str(self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(BillingInterval::Monthly),
            "yearly" => Some(BillingInterval::Yearly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSlug {
    Free,
    Pro,
    Business,
    Enterprise,
}

impl PlanSlug {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanSlug::Free => "free",
            PlanSlug::Pro => "pro",
            PlanSlug::Business => "business",
            PlanSlug::Enterprise => "enterprise",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(PlanSlug::Free),
            "pro" => Some(PlanSlug::Pro),
            "business" => Some(PlanSlug::Business),
            "enterprise" => Some(PlanSlug::Enterprise),
            _ => None,
        }
    }
}

/// Internal subscription status, after upstream→internal mapping (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Unpaid,
    Paused,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "trialing" => SubscriptionStatus::Trialing,
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "unpaid" => SubscriptionStatus::Unpaid,
            "paused" => SubscriptionStatus::Paused,
            "canceled" => SubscriptionStatus::Canceled,
            _ => return None,
        })
    }

    /// Entitled set: `{active, trialing, past_due}` (spec §4.8).
    pub fn is_entitled(self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing | SubscriptionStatus::PastDue
        )
    }

    /// Non-entitled terminal set: `{canceled, unpaid, paused}` (spec §4.8).
    pub fn is_nonentitled_terminal(self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Canceled | SubscriptionStatus::Unpaid | SubscriptionStatus::Paused
        )
    }

    /// Map an upstream Stripe subscription status string to the internal
    /// status per spec §4.8's table. Unknown upstream values fail closed to
    /// `past_due` rather than being treated as entitled-with-no-evidence.
    pub fn from_upstream(s: &str) -> Self {
        match s {
            "trialing" => SubscriptionStatus::Trialing,
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "unpaid" => SubscriptionStatus::Unpaid,
            "paused" => SubscriptionStatus::Paused,
            "incomplete" => SubscriptionStatus::PastDue,
            "incomplete_expired" | "canceled" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::PastDue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WebhookEventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookEventStatus::Pending => "pending",
            WebhookEventStatus::Processing => "processing",
            WebhookEventStatus::Completed => "completed",
            WebhookEventStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => WebhookEventStatus::Pending,
            "processing" => WebhookEventStatus::Processing,
            "completed" => WebhookEventStatus::Completed,
            "failed" => WebhookEventStatus::Failed,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutIdempotencyStatus {
    InProgress,
    Completed,
    Failed,
}

impl CheckoutIdempotencyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckoutIdempotencyStatus::InProgress => "in_progress",
            CheckoutIdempotencyStatus::Completed => "completed",
            CheckoutIdempotencyStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "in_progress" => CheckoutIdempotencyStatus::InProgress,
            "completed" => CheckoutIdempotencyStatus::Completed,
            "failed" => CheckoutIdempotencyStatus::Failed,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCustomerEventType {
    Validated,
    Invalidated,
    Recreated,
    WebhookDeleted,
}

impl BillingCustomerEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            BillingCustomerEventType::Validated => "validated",
            BillingCustomerEventType::Invalidated => "invalidated",
            BillingCustomerEventType::Recreated => "recreated",
            BillingCustomerEventType::WebhookDeleted => "webhook_deleted",
        }
    }
}

// ---------------------------------------------------------------------------
// Billing rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CheckoutIdempotencyRow {
    pub workspace_id: Uuid,
    pub client_key: Uuid,
    pub plan_variant_id: Uuid,
    pub request_fingerprint: String,
    pub upstream_idempotency_key: String,
    pub upstream_session_id: Option<String>,
    pub upstream_session_url: Option<String>,
    pub status: CheckoutIdempotencyStatus,
    pub expires_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebhookEventRow {
    pub id: Uuid,
    pub external_event_id: String,
    pub event_type: String,
    pub payload: Value,
    pub status: WebhookEventStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub processor_id: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct WorkspaceBillingCustomerRow {
    pub workspace_id: Uuid,
    pub customer_id: String,
}

#[derive(Debug, Clone)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub plan: PlanSlug,
    pub plan_variant_id: Option<Uuid>,
    pub status: SubscriptionStatus,
    pub upstream_subscription_id: Option<String>,
    pub customer_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub grace_period_end: Option<DateTime<Utc>>,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct PlanVariantRow {
    pub id: Uuid,
    pub plan_slug: PlanSlug,
    pub interval: BillingInterval,
    pub currency: String,
    pub active: bool,
    pub upstream_price_id: String,
    pub amount_cents: i64,
    pub trial_period_days: i32,
}

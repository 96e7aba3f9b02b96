//! Wire-level request/response DTOs for the HTTP surface. Plain data, no
//! logic — conversions to/from the domain types happen in `routes.rs`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct FormSchemaOut {
    pub id: Uuid,
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

#[derive(Debug, Serialize)]
pub struct FormSchemaResponseBody {
    pub form: FormSchemaOut,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitRequestBody {
    pub data: Map<String, Value>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponseBody {
    pub submission_id: Uuid,
    pub success_message: Option<String>,
    pub redirect_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckoutSessionRequestBody {
    pub plan_slug: String,
    pub interval: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutSessionResponseBody {
    pub url: String,
    pub session_id: String,
    pub destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotent_replay: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct PortalSessionResponseBody {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookIngestResponseBody {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CatalogSyncResponseBody {
    pub scanned_prices: usize,
    pub eligible_prices: usize,
    pub updated_variants: usize,
    pub missing_variants: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponseBody {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponseBody {
    pub ready: bool,
}

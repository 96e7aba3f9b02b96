//! Production [`BillingClient`] wiring against the Stripe REST API.
//!
//! This is the only module in the crate that imports `reqwest` directly.
//! Stripe's API is form-encoded on the way in and JSON on the way out;
//! everything here exists to translate between that wire shape and the
//! provider-agnostic DTOs in [`crate::client`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::client::{
    BillingClient, BillingError, CheckoutSessionRequest, CreateCustomerRequest, ProviderCustomer,
    ProviderErrorDetail, ProviderPrice, ProviderSession, ProviderSubscription, ProviderSubscriptionItem,
};

const DEFAULT_BASE_URL: &str = "https://api.stripe.com/v1";

pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(http: reqwest::Client, secret_key: String) -> Self {
        Self {
            http,
            secret_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(http: reqwest::Client, secret_key: String, base_url: String) -> Self {
        Self {
            http,
            secret_key,
            base_url,
        }
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, BillingError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .basic_auth(&self.secret_key, Some(""))
            .send()
            .await
            .map_err(|e| BillingError::Transport(e.to_string()))?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        decode_response(response).await.map(Some)
    }

    async fn post_form(
        &self,
        path: &str,
        idempotency_key: Option<&str>,
        form: &[(String, String)],
    ) -> Result<Value, BillingError> {
        let mut builder = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.secret_key, Some(""))
            .form(form);
        if let Some(key) = idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }

        let response = builder.send().await.map_err(|e| BillingError::Transport(e.to_string()))?;
        decode_response(response).await
    }
}

async fn decode_response(response: reqwest::Response) -> Result<Value, BillingError> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| BillingError::Transport(e.to_string()))?;

    if status.is_success() {
        return Ok(body);
    }

    let detail = body
        .get("error")
        .map(|e| ProviderErrorDetail {
            error_type: e.get("type").and_then(|v| v.as_str()).map(str::to_string),
            code: e.get("code").and_then(|v| v.as_str()).map(str::to_string),
            param: e.get("param").and_then(|v| v.as_str()).map(str::to_string),
            message: e.get("message").and_then(|v| v.as_str()).map(str::to_string),
        })
        .unwrap_or_default();
    Err(BillingError::Provider(detail))
}

fn flatten_metadata(form: &mut Vec<(String, String)>, metadata: &Value) {
    let Some(map) = metadata.as_object() else {
        return;
    };
    for (key, value) in map {
        if let Some(s) = value.as_str() {
            form.push((format!("metadata[{key}]"), s.to_string()));
        }
    }
}

fn parse_timestamp(value: &Value, field: &str) -> Option<DateTime<Utc>> {
    value
        .get(field)
        .and_then(|v| v.as_i64())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn parse_subscription(value: &Value) -> Result<ProviderSubscription, BillingError> {
    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BillingError::UnexpectedResponse("subscription missing id".to_string()))?
        .to_string();
    let customer_id = value
        .get("customer")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BillingError::UnexpectedResponse("subscription missing customer".to_string()))?
        .to_string();
    let status = value
        .get("status")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BillingError::UnexpectedResponse("subscription missing status".to_string()))?
        .to_string();

    let items = value
        .get("items")
        .and_then(|i| i.get("data"))
        .and_then(|d| d.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    entry
                        .get("price")
                        .and_then(|p| p.get("id"))
                        .and_then(|v| v.as_str())
                        .map(|price_id| ProviderSubscriptionItem {
                            price_id: price_id.to_string(),
                        })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ProviderSubscription {
        id,
        customer_id,
        status,
        items,
        current_period_start: parse_timestamp(value, "current_period_start"),
        current_period_end: parse_timestamp(value, "current_period_end"),
        trial_start: parse_timestamp(value, "trial_start"),
        trial_end: parse_timestamp(value, "trial_end"),
        cancel_at_period_end: value.get("cancel_at_period_end").and_then(|v| v.as_bool()).unwrap_or(false),
        canceled_at: parse_timestamp(value, "canceled_at"),
        ended_at: parse_timestamp(value, "ended_at"),
        metadata: value.get("metadata").cloned().unwrap_or_else(|| Value::Object(Default::default())),
    })
}

fn parse_price(value: &Value) -> Option<ProviderPrice> {
    Some(ProviderPrice {
        id: value.get("id")?.as_str()?.to_string(),
        currency: value.get("currency")?.as_str()?.to_string(),
        unit_amount: value.get("unit_amount").and_then(|v| v.as_i64()),
        recurring_interval: value
            .get("recurring")
            .and_then(|r| r.get("interval"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        lookup_key: value.get("lookup_key").and_then(|v| v.as_str()).map(str::to_string),
        metadata: value.get("metadata").cloned().unwrap_or_else(|| Value::Object(Default::default())),
        active: value.get("active").and_then(|v| v.as_bool()).unwrap_or(false),
        created: value.get("created").and_then(|v| v.as_i64()).unwrap_or(0),
    })
}

#[async_trait]
impl BillingClient for StripeClient {
    async fn retrieve_customer(&self, id: &str) -> Result<Option<ProviderCustomer>, BillingError> {
        let Some(body) = self.get(&format!("/customers/{id}")).await? else {
            return Ok(None);
        };
        Ok(Some(ProviderCustomer {
            id: body.get("id").and_then(|v| v.as_str()).unwrap_or(id).to_string(),
            deleted: body.get("deleted").and_then(|v| v.as_bool()).unwrap_or(false),
        }))
    }

    async fn create_customer(&self, request: CreateCustomerRequest) -> Result<ProviderCustomer, BillingError> {
        let mut form = Vec::new();
        if let Some(email) = &request.email {
            form.push(("email".to_string(), email.clone()));
        }
        flatten_metadata(&mut form, &request.metadata);

        let body = self
            .post_form("/customers", Some(&request.idempotency_key), &form)
            .await?;
        Ok(ProviderCustomer {
            id: body
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| BillingError::UnexpectedResponse("create_customer missing id".to_string()))?
                .to_string(),
            deleted: false,
        })
    }

    async fn create_checkout_session(&self, request: CheckoutSessionRequest) -> Result<ProviderSession, BillingError> {
        let mut form = vec![
            ("mode".to_string(), "subscription".to_string()),
            ("customer".to_string(), request.customer_id.clone()),
            ("line_items[0][price]".to_string(), request.price_id.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("client_reference_id".to_string(), request.client_reference_id.clone()),
        ];
        flatten_metadata(&mut form, &request.metadata);

        let body = self
            .post_form("/checkout/sessions", Some(&request.idempotency_key), &form)
            .await?;
        parse_session(&body)
    }

    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<ProviderSession, BillingError> {
        let form = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("return_url".to_string(), return_url.to_string()),
        ];
        let body = self.post_form("/billing_portal/sessions", None, &form).await?;
        parse_session(&body)
    }

    async fn retrieve_subscription(&self, id: &str) -> Result<ProviderSubscription, BillingError> {
        let body = self
            .get(&format!("/subscriptions/{id}"))
            .await?
            .ok_or_else(|| BillingError::UnexpectedResponse(format!("subscription {id} not found")))?;
        parse_subscription(&body)
    }

    async fn list_active_recurring_prices(&self) -> Result<Vec<ProviderPrice>, BillingError> {
        let mut prices = Vec::new();
        let mut starting_after: Option<String> = None;

        loop {
            let mut path = "/prices?active=true&type=recurring&limit=100".to_string();
            if let Some(cursor) = &starting_after {
                path.push_str(&format!("&starting_after={cursor}"));
            }
            let body = self
                .get(&path)
                .await?
                .ok_or_else(|| BillingError::UnexpectedResponse("price list request returned 404".to_string()))?;

            let data = body
                .get("data")
                .and_then(|d| d.as_array())
                .ok_or_else(|| BillingError::UnexpectedResponse("price list missing data array".to_string()))?;

            let page_empty = data.is_empty();
            for entry in data {
                if let Some(price) = parse_price(entry) {
                    prices.push(price);
                }
            }

            let has_more = body.get("has_more").and_then(|v| v.as_bool()).unwrap_or(false);
            if !has_more || page_empty {
                break;
            }
            starting_after = prices.last().map(|p| p.id.clone());
        }

        Ok(prices)
    }
}

fn parse_session(body: &Value) -> Result<ProviderSession, BillingError> {
    Ok(ProviderSession {
        id: body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BillingError::UnexpectedResponse("session response missing id".to_string()))?
            .to_string(),
        url: body
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BillingError::UnexpectedResponse("session response missing url".to_string()))?
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_price_extracts_recurring_interval_and_lookup_key() {
        let raw = json!({
            "id": "price_1",
            "currency": "usd",
            "unit_amount": 1900,
            "recurring": {"interval": "month"},
            "lookup_key": "formsandbox:prod:pro:monthly:usd",
            "metadata": {},
            "active": true,
            "created": 1_700_000_000,
        });
        let price = parse_price(&raw).expect("price parses");
        assert_eq!(price.recurring_interval.as_deref(), Some("month"));
        assert_eq!(price.lookup_key.as_deref(), Some("formsandbox:prod:pro:monthly:usd"));
    }

    #[test]
    fn parse_subscription_collects_price_ids_from_items() {
        let raw = json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "active",
            "items": {"data": [{"price": {"id": "price_1"}}]},
            "cancel_at_period_end": false,
            "metadata": {"workspace_id": "11111111-1111-4111-8111-111111111111"},
        });
        let sub = parse_subscription(&raw).expect("subscription parses");
        assert_eq!(sub.items.len(), 1);
        assert_eq!(sub.items[0].price_id, "price_1");
    }
}

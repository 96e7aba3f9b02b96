//! In-memory [`BillingClient`] for tests. Gated behind `cfg(test)` or the
//! `testkit` feature, mirroring the teacher's paper-broker pattern of
//! swapping the real adapter for a deterministic double instead of mocking
//! individual calls.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{
    BillingClient, BillingError, CheckoutSessionRequest, CreateCustomerRequest, ProviderCustomer,
    ProviderErrorDetail, ProviderPrice, ProviderSession, ProviderSubscription,
};

#[derive(Default)]
struct FakeState {
    next_id: u64,
    customers: HashMap<String, ProviderCustomer>,
    subscriptions: HashMap<String, ProviderSubscription>,
    prices: Vec<ProviderPrice>,
}

#[derive(Default)]
pub struct FakeBillingClient {
    state: Mutex<FakeState>,
}

impl FakeBillingClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, state: &mut FakeState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{prefix}_{}", state.next_id)
    }

    /// Replace the catalog list returned by `list_active_recurring_prices`.
    pub fn seed_prices(&self, prices: Vec<ProviderPrice>) {
        self.state.lock().unwrap().prices = prices;
    }

    /// Register a subscription `retrieve_subscription` can return.
    pub fn seed_subscription(&self, subscription: ProviderSubscription) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    /// Mark a customer deleted without removing it, simulating Stripe's
    /// `{deleted: true}` retrieve response.
    pub fn mark_customer_deleted(&self, id: &str) {
        if let Some(customer) = self.state.lock().unwrap().customers.get_mut(id) {
            customer.deleted = true;
        }
    }

    /// Remove a customer entirely, simulating a `resource_missing` error on
    /// the next retrieve.
    pub fn forget_customer(&self, id: &str) {
        self.state.lock().unwrap().customers.remove(id);
    }
}

fn missing_customer_error(id: &str) -> BillingError {
    BillingError::Provider(ProviderErrorDetail {
        error_type: Some("invalid_request_error".to_string()),
        code: Some("resource_missing".to_string()),
        param: Some("customer".to_string()),
        message: Some(format!("No such customer: '{id}'")),
    })
}

#[async_trait]
impl BillingClient for FakeBillingClient {
    async fn retrieve_customer(&self, id: &str) -> Result<Option<ProviderCustomer>, BillingError> {
        let state = self.state.lock().unwrap();
        match state.customers.get(id) {
            Some(customer) => Ok(Some(customer.clone())),
            None => Err(missing_customer_error(id)),
        }
    }

    async fn create_customer(&self, request: CreateCustomerRequest) -> Result<ProviderCustomer, BillingError> {
        let mut state = self.state.lock().unwrap();
        let id = self.next_id(&mut state, "cus");
        let customer = ProviderCustomer { id: id.clone(), deleted: false };
        state.customers.insert(id, customer.clone());
        let _ = request;
        Ok(customer)
    }

    async fn create_checkout_session(&self, request: CheckoutSessionRequest) -> Result<ProviderSession, BillingError> {
        let mut state = self.state.lock().unwrap();
        let id = self.next_id(&mut state, "cs");
        let _ = request;
        Ok(ProviderSession {
            url: format!("https://checkout.example.com/{id}"),
            id,
        })
    }

    async fn create_portal_session(&self, customer_id: &str, _return_url: &str) -> Result<ProviderSession, BillingError> {
        let mut state = self.state.lock().unwrap();
        let id = self.next_id(&mut state, "bps");
        let _ = customer_id;
        Ok(ProviderSession {
            url: format!("https://billing.example.com/p/{id}"),
            id,
        })
    }

    async fn retrieve_subscription(&self, id: &str) -> Result<ProviderSubscription, BillingError> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .get(id)
            .cloned()
            .ok_or_else(|| BillingError::UnexpectedResponse(format!("fake has no subscription {id}")))
    }

    async fn list_active_recurring_prices(&self) -> Result<Vec<ProviderPrice>, BillingError> {
        Ok(self.state.lock().unwrap().prices.clone())
    }
}

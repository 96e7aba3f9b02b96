//! Billing-integration domain logic (C5, C6, C8, C10).
//!
//! Every module here talks to the upstream payment provider only through
//! [`client::BillingClient`] and to Postgres only through `gatekit-db`; none
//! of them import `reqwest` or `sqlx` directly except [`stripe_client`]
//! (the production `BillingClient` wiring) and the table-access calls routed
//! through `gatekit-db`. This split is what makes `checkout`, `customers`,
//! `events` and `catalog` unit-testable against [`fake::FakeBillingClient`]
//! without a live provider or database.

pub mod catalog;
pub mod checkout;
pub mod client;
pub mod customers;
pub mod events;
pub mod fingerprint;
pub mod stripe_client;

#[cfg(any(test, feature = "testkit"))]
pub mod fake;

pub use client::{BillingClient, BillingError};

use std::sync::Arc;

use gatekit_billing::BillingClient;
use gatekit_config::AppConfig;
use sqlx::PgPool;

use crate::auth::AuthClient;

/// Reported on the health endpoint.
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            service: "gatekit-daemon",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub billing: Arc<dyn BillingClient>,
    pub auth: Arc<dyn AuthClient>,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        billing: Arc<dyn BillingClient>,
        auth: Arc<dyn AuthClient>,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            billing,
            auth,
            build: BuildInfo::default(),
        }
    }
}

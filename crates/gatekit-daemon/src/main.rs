//! gatekit-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, builds the shared
//! state, wires middleware, and starts the HTTP server. All route handlers
//! live in `routes.rs`; all shared state types live in `state.rs`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use gatekit_daemon::{routes, state::AppState};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let config = gatekit_config::AppConfig::from_env().context("loading configuration")?;

    let pool = gatekit_db::connect(config.database_url.expose())
        .await
        .context("connecting to Postgres")?;
    gatekit_db::migrate(&pool).await.context("running migrations")?;

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("building HTTP client")?;

    let billing: Arc<dyn gatekit_billing::BillingClient> = Arc::new(gatekit_billing::stripe_client::StripeClient::new(
        http.clone(),
        config.stripe_secret_key.expose().to_string(),
    ));
    let auth: Arc<dyn gatekit_daemon::auth::AuthClient> = Arc::new(gatekit_daemon::auth::SupabaseAuthClient::new(
        http,
        pool.clone(),
        config.supabase_url.clone(),
        config.supabase_anon_key.expose().to_string(),
    ));

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(pool, config, billing, auth);

    // Webhook body size is separately and more tightly enforced in
    // `routes::stripe_webhook` via `STRIPE_WEBHOOK_MAX_BODY_BYTES`; this is a
    // coarse ceiling for the whole surface so a form submission with a
    // pathological payload doesn't get buffered into memory unbounded.
    const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

    let app = routes::build_router(state)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = bind_addr.parse().context("parsing GATEKIT_BIND_ADDR")?;
    info!("gatekit-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

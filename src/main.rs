//! Billing Sync service entry point.
//!
//! Wires configuration, the PostgreSQL pool, the provider client, and
//! the webhook route into a running Axum server.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use billing_sync::adapters::http::{webhook_routes, WebhookAppState};
use billing_sync::adapters::postgres::{PostgresBillingRepository, PostgresEventStore};
use billing_sync::adapters::stripe::StripeRemoteFetcher;
use billing_sync::application::handlers::ProcessWebhookHandler;
use billing_sync::config::AppConfig;
use billing_sync::domain::billing::{ReconciliationEngine, WebhookVerifier};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.server.log_level))
        .init();

    info!(
        environment = ?config.server.environment,
        "starting billing-sync"
    );

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(&config.database.url)
        .await?;

    if config.database.run_migrations {
        info!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
    }

    let event_store = Arc::new(PostgresEventStore::new(pool.clone()));
    let repository = Arc::new(PostgresBillingRepository::new(pool));
    let fetcher = Arc::new(StripeRemoteFetcher::new(&config.payment));
    let engine = Arc::new(ReconciliationEngine::new(repository, fetcher));

    let webhook_handler = Arc::new(ProcessWebhookHandler::new(
        WebhookVerifier::new(&config.payment.webhook_secret),
        event_store,
        engine,
    ));

    let state = WebhookAppState { webhook_handler };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api/webhooks", webhook_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )));

    let addr = config.server.socket_addr();
    info!(%addr, "listening for webhook deliveries");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

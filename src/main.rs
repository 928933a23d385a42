mod api;
mod app;
mod auth;
mod config;
mod db;
mod domain;
mod error;
mod logging;
mod middleware;
mod money;
mod routes;
mod services;
mod stats;

use anyhow::Result;
use std::sync::Arc;

use services::{EventPublisher, MemoClient, RedisCache, SystemClock};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = config::Settings::from_env()?;

    // Initialize logging
    logging::init_logging(&settings.env);

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        "Starting bidcore backend"
    );

    // Create database pool and apply migrations
    let pool = db::create_pool(&settings).await?;
    db::run_migrations(&pool).await?;

    // Redis backs the published-event idempotency guard
    let cache = RedisCache::new(&settings.redis_url).await?;

    let events = EventPublisher::new(&settings, cache.clone())?;

    let memo_client = MemoClient::new(
        &settings.memo_service_url,
        &settings.memo_service_token,
        settings.memo_service_timeout_seconds,
    )?;

    // Optionally check memo service health (non-blocking)
    tokio::spawn({
        let memo_client = memo_client.clone();
        async move {
            match memo_client.health_check().await {
                Ok(()) => tracing::info!("Memo service is healthy"),
                Err(e) => tracing::warn!(error = %e, "Memo service health check failed - will retry on first request"),
            }
        }
    });

    // Create application state
    let state = app::AppState::new(
        pool,
        settings.clone(),
        Arc::new(SystemClock),
        cache,
        events,
        memo_client,
    );

    // Build application
    let app = app::create_app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

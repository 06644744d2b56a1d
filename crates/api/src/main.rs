//! AssetMail API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use assetmail_common::config::AppConfig;
use assetmail_common::db::{create_pool, migrate};
use assetmail_engine::{MailQueue, NotificationPipeline, PgStore};

use assetmail_api::routes::create_router;
use assetmail_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("assetmail_api=debug,assetmail_engine=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting AssetMail API server...");

    // Load configuration
    let config = AppConfig::from_env()?;
    let zone = config.zone()?;

    // Create database connection pool
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    migrate(&pool).await?;

    // Build application state
    let store = Arc::new(PgStore::new(pool));
    let pipeline = NotificationPipeline::new(
        store.clone(),
        store.clone(),
        MailQueue::new(store.clone(), zone),
        config.admin_email.clone(),
        zone,
        config.reminder_lookahead_days,
    );
    let state = AppState::new(pipeline, store.clone(), store);

    // Build router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use docstore_console::{
    app,
    config::AppConfig,
    database::{DatabaseManager, PgAuditStore, PgDocumentStore, PgHistoryStore},
    store::MemoryStore,
    AppState,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = docstore_console::config::config().clone();
    tracing::info!("Starting document store console in {:?} mode", config.environment);

    if config.security.jwt_secret.is_empty() {
        anyhow::bail!("JWT_SECRET must be set outside development");
    }

    let port = config.api.port;
    let (state, manager) = build_state(config).await?;

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Console listening on http://{}", bind_addr);

    axum::serve(listener, app(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(manager) = manager {
        manager.close().await;
    }
    Ok(())
}

async fn build_state(config: AppConfig) -> anyhow::Result<(AppState, Option<DatabaseManager>)> {
    if config.database.url.is_none() {
        tracing::warn!("DATABASE_URL not set; using in-memory stores, nothing will persist");
        return Ok((AppState::in_memory(config, Arc::new(MemoryStore::new())), None));
    }

    let manager = DatabaseManager::connect(&config.database).await?;
    manager.migrate().await?;

    let pool = manager.pool().clone();
    let per_actor = config.audit.history_per_actor;
    let slow_query = std::time::Duration::from_millis(config.database.slow_query_threshold_ms);
    let documents = PgDocumentStore::new(pool.clone()).with_slow_query_threshold(slow_query);
    let state = AppState::new(
        config,
        Arc::new(documents),
        Arc::new(PgAuditStore::new(pool.clone())),
        Arc::new(PgHistoryStore::new(pool, per_actor)),
    );
    Ok((state, Some(manager)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use dmhub_server::auth::jwt::load_or_generate_jwt_secret;
use dmhub_server::config::{generate_config_template, Config};
use dmhub_server::db::{self, store::MessageStore, store::SqliteStore};
use dmhub_server::presence::spawn_presence_worker;
use dmhub_server::routes;
use dmhub_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dmhub_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("dmhub server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Shared secret from config, otherwise a random key kept in data_dir
    let jwt_secret = match &config.jwt_secret {
        Some(secret) if !secret.is_empty() => secret.as_bytes().to_vec(),
        _ => load_or_generate_jwt_secret(&config.data_dir)?,
    };

    let store: Arc<dyn MessageStore> = Arc::new(SqliteStore::new(db.clone()));
    let (presence, presence_task) =
        spawn_presence_worker(store.clone(), config.presence.queue_capacity);

    let (app_state, hub_task) =
        AppState::with_store(db, store, &jwt_secret, presence, config.ws.clone());
    let hub = app_state.hub.clone();

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Close every live connection, then let the presence queue drain.
    // The worker ends once the hub and every pipeline clone are gone.
    tracing::info!("Shutting down, closing connections");
    hub.shutdown().await;
    drop(hub);
    if let Err(e) = hub_task.await {
        tracing::warn!(error = %e, "Hub task failed");
    }
    if let Err(e) = presence_task.await {
        tracing::warn!(error = %e, "Presence worker failed");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

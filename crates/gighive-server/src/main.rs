use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use gighive_api::config::Config;
use gighive_api::identity::HttpIdentityProvider;
use gighive_api::reconcile::reconcile_profile_deletions;
use gighive_api::storage::Storage;
use gighive_api::{AppState, AppStateInner};
use gighive_db::Database;
use gighive_gateway::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gighive=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database and object storage
    let db = Database::open(&config.db_path)?;
    tokio::fs::create_dir_all(&config.storage_dir).await?;
    let storage = Storage::new(&config.storage_dir, &config.storage_signing_key, &config.public_url)?;
    info!("Object storage at {}", config.storage_dir.display());

    let state: AppState = Arc::new(AppStateInner {
        db,
        storage,
        dispatcher: Dispatcher::new(),
        identity: Arc::new(HttpIdentityProvider::new(config.identity.clone())),
        config,
    });

    // Finish profile deletions interrupted by the last shutdown
    if let Err(e) = reconcile_profile_deletions(&state).await {
        warn!("Profile deletion reconciliation failed: {:#}", e);
    }

    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port).parse()?;
    let app = gighive_api::router(state);

    info!("GigHive server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mediahub::auth::{AuthManager, SessionStore};
use mediahub::config::Config;
use mediahub::tmdb::TmdbClient;
use mediahub::{build_router, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting MediaHub...");

    let config = Config::new()?;
    info!("Configuration loaded");

    let db_pool = db::init_db(&config.database_url).await?;
    info!("Database initialized");

    let tmdb_client = TmdbClient::new(&config.tmdb_api_key, &config.tmdb_base_url, &config.tmdb_language)?;
    info!(base_url = %config.tmdb_base_url, language = %config.tmdb_language, "TMDB client initialized");

    let sessions = SessionStore::new(db_pool.clone(), &config.session_secret, config.session_ttl_days);
    let pruned = sessions.prune_expired().await?;
    info!(pruned, "Session store ready");

    let state = AppState::new(
        db_pool.clone(),
        Arc::new(tmdb_client),
        AuthManager::new(db_pool.clone()),
        sessions,
        &config.tmdb_region,
    );

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

//! Process wiring: open the store, build state and run the HTTP server.

use crate::adapters::SqliteStore;
use crate::api::{self, AppState};
use crate::config::TomlConfig;
use crate::utils::error::{AppError, Result};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

/// 以設定檔組出完整的 router
pub fn build_app(config: &TomlConfig, store: Arc<SqliteStore>) -> Result<Router> {
    let state = AppState::from_config(config, store)?;
    let origins = config.server.cors_origins.clone().unwrap_or_default();
    Ok(api::router(state, &origins))
}

pub async fn serve(config: TomlConfig) -> Result<()> {
    tracing::info!("🗄️ Opening database at {}", config.database.path);
    let store = Arc::new(SqliteStore::open(&config.database.path)?);
    let app = build_app(&config, store)?;

    let address = config.bind_address();
    let listener = TcpListener::bind(&address).await.map_err(AppError::IoError)?;
    tracing::info!("🚀 Server running on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(AppError::IoError)?;

    tracing::info!("👋 Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("❌ Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("❌ Failed to install SIGTERM handler: {}", e);
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
}

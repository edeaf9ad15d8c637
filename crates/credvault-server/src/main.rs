//! `credvault` server entry point.
//!
//! Loads configuration, opens storage, builds the vault, then serves the
//! Axum router until SIGINT or SIGTERM. Shutdown fires the cancel signal so
//! any in-flight bulk regeneration rolls back instead of half-committing.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use credvault_core::cancel::{CancelHandle, cancel_pair};
use credvault_server::bootstrap;
use credvault_server::config::ServerConfig;
use credvault_server::routes::build_router;
use credvault_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(
        storage = ?config.storage_backend,
        enforce_permissions = config.core.enforce_permissions,
        "credvault starting"
    );

    let storage = bootstrap::open_storage(&config)?;
    let vault = bootstrap::build_vault(&config, storage).await;
    if let Some(admin) = &config.bootstrap_admin {
        bootstrap::grant_admin(&vault, admin).await?;
    }

    let (cancel, shutdown) = cancel_pair();
    let state = Arc::new(AppState::new(&vault, shutdown));
    let app = build_router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "credvault server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .context("server error")?;

    info!("credvault server stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM, then cancel in-flight work.
async fn shutdown_signal(cancel: CancelHandle) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
    cancel.cancel();
}

use anyhow::Result;
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use services::{
    backend::DatabaseBackend,
    deletion_reconciler::DeletionReconciler,
    director_client::DataDirectorClient,
    pool_reconciler::{PoolReconciler, ReservePolicy},
    provisioner::{Provisioner, ProvisionerSettings},
    resource_store::ResourceStore,
    retry::TokioSleeper,
    scheduler::spawn_periodic,
};

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting db-pool-broker with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );

    let store = ResourceStore::new(db);
    store.ensure_schema().await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Backend client ---
    let director =
        DataDirectorClient::connect(cfg.director.base_url()?, &cfg.director).await?;
    tracing::info!(placement = ?director.placement(), "backend placement resolved");
    let backend: Arc<dyn DatabaseBackend> = Arc::new(director);

    // --- Background reconcilers ---
    let shutdown = CancellationToken::new();
    let sleeper = Arc::new(TokioSleeper);

    let pool_reconciler = Arc::new(PoolReconciler::new(
        store.clone(),
        backend.clone(),
        Arc::new(ReservePolicy {
            min_pool_size: cfg.pool.min_pool_size,
        }),
        sleeper.clone(),
    ));
    let fill_task = spawn_periodic(
        "pool-fill",
        cfg.pool.pool_check_cycle,
        shutdown.clone(),
        move || {
            let reconciler = pool_reconciler.clone();
            async move {
                let report = reconciler.fill_cycle().await;
                tracing::debug!(?report, "pool fill pass finished");
            }
        },
    );

    let deletion_reconciler = Arc::new(DeletionReconciler::new(
        store.clone(),
        backend.clone(),
        sleeper,
    ));
    let cleanup_task = spawn_periodic(
        "pool-cleanup",
        cfg.pool.cleanup_check_cycle,
        shutdown.clone(),
        move || {
            let reconciler = deletion_reconciler.clone();
            async move {
                let report = reconciler.cleanup_cycle().await;
                tracing::debug!(?report, "cleanup pass finished");
            }
        },
    );

    // --- Initialize core service ---
    let provisioner = Provisioner::new(
        store,
        backend,
        ProvisionerSettings {
            nameserver: cfg.pool.nameserver.clone(),
            nameserver_port: cfg.pool.nameserver_port,
            update_service_name: cfg.pool.update_service_name,
        },
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(provisioner);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("shutdown requested");
            signal.cancel();
        })
        .await?;

    // The HTTP side may stop for reasons other than the signal.
    shutdown.cancel();
    for task in [fill_task, cleanup_task] {
        if let Err(e) = task.await {
            tracing::error!("background task ended abnormally: {}", e);
        }
    }
    tracing::info!("Shutdown complete.");

    Ok(())
}

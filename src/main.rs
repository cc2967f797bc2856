use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use trash_vault::{
    config::{AppConfig, Backend},
    services::{
        lifecycle::LifecycleManager, local_store::LocalObjectStore,
        memory_store::MemoryObjectStore, object_store::ObjectStore, sweeper::SweepWorker,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!(
        backend = ?cfg.backend,
        files = %cfg.files_container,
        trash = %cfg.trash_container,
        retention_days = cfg.retention_days,
        sweep_interval_secs = cfg.sweep_interval_secs,
        "Starting trash-vault"
    );

    LocalObjectStore::ensure_container_name_safe(&cfg.files_container)?;
    LocalObjectStore::ensure_container_name_safe(&cfg.trash_container)?;

    // --- Initialize storage backend ---
    let store: Arc<dyn ObjectStore> = match cfg.backend {
        Backend::Local => {
            let local = open_local_store(&cfg).await?;
            if migrate {
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }
            Arc::new(local)
        }
        Backend::Memory => {
            if migrate {
                anyhow::bail!("--migrate only applies to the local backend");
            }
            tracing::warn!("Using in-memory backend; all files are lost on exit");
            Arc::new(MemoryObjectStore::new())
        }
    };

    // --- Initialize core services ---
    let lifecycle = LifecycleManager::new(store, cfg.lifecycle());
    if cfg.cleanup_api_key.is_none() {
        tracing::warn!("TRASH_VAULT_CLEANUP_API_KEY not set; /api/trash/cleanup will refuse requests");
    }
    let state = AppState::new(lifecycle, cfg.cleanup_api_key.clone());

    let worker = match cfg.sweep_interval() {
        Some(every) => {
            let worker = SweepWorker::new(state.sweeper.clone(), every);
            Some(tokio::spawn(worker.run(shutdown_signal())))
        }
        None => {
            tracing::info!("Background expiry sweep disabled");
            None
        }
    };

    // --- Build router ---
    let app = trash_vault::app(state, cfg.max_upload_bytes);

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
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = worker {
        let stats = handle.await.context("joining sweep worker")?;
        tracing::info!(
            "Sweep worker ran {} sweeps, deleted {} entries",
            stats.sweep_count,
            stats.total_deleted
        );
    }

    Ok(())
}

/// Open the SQLite index and payload directory, applying the schema.
async fn open_local_store(cfg: &AppConfig) -> Result<LocalObjectStore> {
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");

    // Create parent directory if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {:?}", parent))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL `{}`", db_url))?
        .create_if_missing(true);
    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("connecting to SQLite")?;

    let store = LocalObjectStore::new(Arc::new(db), cfg.storage_dir.clone());
    store.init().await.context("initializing local object store")?;
    tracing::info!("Local store ready at {}", cfg.storage_dir);
    Ok(store)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}

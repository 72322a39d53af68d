use anyhow::Result;
use axum::Router;
use bucket_dav::{
    config,
    routes::routes::routes,
    services::{
        database,
        lock_store::SqliteLockStore,
        storage_service::StorageService,
    },
    state::AppState,
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting bucket-dav with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection + schema ---
    let db = Arc::new(database::connect(&cfg.database_url).await?);
    database::run_migrations(&db).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize stores ---
    let storage = StorageService::new(db.clone(), cfg.storage_dir.clone());
    let locks = SqliteLockStore::new(db.clone());
    match locks.purge_expired().await {
        Ok(purged) if purged > 0 => tracing::info!("Purged {} expired locks", purged),
        Ok(_) => {}
        Err(err) => tracing::warn!("Could not purge expired locks: {}", err),
    }

    if cfg.credentials.is_none() {
        tracing::warn!("DAV_USERNAME/DAV_PASSWORD not set; authentication is disabled");
    }

    // --- Build router ---
    let state = AppState::new(Arc::new(storage), Arc::new(locks), cfg.credentials.clone());
    let app: Router = routes(state);

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
    axum::serve(listener, app).await?;

    Ok(())
}

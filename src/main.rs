use anyhow::Result;
use axum::Router;
use config::Backend;
use models::bucket::BucketNames;
use services::{
    gateway::ObjectStoreGateway, memory_gateway::MemoryGateway, storage_service::StorageService,
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting docvault with config: {:?}", cfg);

    // --- Initialize SQLite (tag catalog, and object metadata for the disk backend) ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);
    db::run_migrations(&db).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize the object store ---
    let gateway: Arc<dyn ObjectStoreGateway> = match cfg.backend {
        Backend::Disk => {
            if !Path::new(&cfg.storage_dir).exists() {
                fs::create_dir_all(&cfg.storage_dir)?;
                tracing::info!("Created storage directory at {}", cfg.storage_dir);
            }
            Arc::new(StorageService::new(db.clone(), cfg.storage_dir.clone()))
        }
        Backend::Memory => {
            tracing::warn!("Using the in-memory backend; documents are lost on exit");
            Arc::new(MemoryGateway::new())
        }
    };

    let buckets = BucketNames::new(cfg.working_bucket.clone(), cfg.stable_bucket.clone());
    let state = routes::AppState::new(gateway, db, buckets, cfg.max_version_attempts);
    state.store.ensure_buckets().await?;

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes).with_state(state);

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

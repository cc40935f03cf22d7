use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::{blob_store::BlobStore, reaper, relay_service::RelayService};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting chatrelay with config: {:?}", cfg);

    // --- Prepare the data directory ---
    // A fresh chat wipes whatever the previous run left behind, unless the
    // operator asked to continue it.
    let data_dir = Path::new(&cfg.data_dir);
    if !cfg.continue_chat && data_dir.exists() {
        fs::remove_dir_all(data_dir)
            .with_context(|| format!("clearing previous data at {}", cfg.data_dir))?;
        tracing::info!("Cleared previous chat data at {}", cfg.data_dir);
    }
    fs::create_dir_all(cfg.blob_dir())
        .with_context(|| format!("creating blob directory {}", cfg.blob_dir()))?;

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // SQLx will not create the file itself with a bare URL.
    match fs::OpenOptions::new().create(true).append(true).open(db_path) {
        Ok(_) => tracing::debug!("Database file can be created/opened."),
        Err(e) => tracing::warn!("Failed to open database file manually: {}", e),
    }

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .with_context(|| format!("opening database {}", db_url))?,
    );

    // An index we cannot read or initialize is unrecoverable; abort startup
    // rather than serving with broken state.
    services::relay_service::apply_schema(&db)
        .await
        .context("initializing message index schema")?;

    // --- Initialize core service ---
    let relay = RelayService::new(
        db.clone(),
        BlobStore::new(cfg.blob_dir()),
        cfg.upload_timeout(),
    );

    // --- Start the stalled-upload sweep ---
    let _reaper = reaper::spawn(relay.clone(), cfg.check_interval());

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(relay);

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

// crates/server/src/main.rs
//! Diligence server binary.
//!
//! Restores jobs and projects from SQLite, rebuilds the search index, then
//! serves the HTTP API until Ctrl-C.

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use diligence_db::Database;
use diligence_server::{create_app, init_metrics, janitor, AppState, ServerConfig};

async fn open_database(config: &ServerConfig) -> Result<Database> {
    let db = if config.in_memory {
        Database::new_in_memory().await?
    } else if let Some(path) = &config.db_path {
        Database::new(path)
            .await
            .with_context(|| format!("opening database at {}", path.display()))?
    } else {
        Database::open_default().await?
    };
    Ok(db)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = diligence_observability::init(&config.log_config());

    let startup_start = Instant::now();

    // Initialize Prometheus metrics
    init_metrics();

    // Step 1: Open database
    let db = open_database(&config).await?;
    if config.in_memory {
        tracing::warn!("running with an in-memory database; state is lost on exit");
    } else {
        tracing::info!(path = %db.db_path().display(), "database opened");
    }

    // Step 2: Answer generator
    let generator = config
        .build_generator()
        .context("configuring answer generator")?;
    tracing::info!(generator = generator.name(), "answer generator ready");

    // Step 3: Restore state and rebuild the search index
    let state = AppState::with_options(db, config.job_settings(), generator).await?;

    // Step 4: Housekeeping for stale and expired jobs
    let janitor = janitor::spawn(state.clone(), config.janitor_settings());

    // Step 5: Bind and serve
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(
        %addr,
        version = env!("CARGO_PKG_VERSION"),
        startup_ms = startup_start.elapsed().as_millis() as u64,
        "listening"
    );

    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    janitor.abort();
    Ok(())
}

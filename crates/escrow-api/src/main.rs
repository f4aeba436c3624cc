//! # escrow-api — Binary Entry Point
//!
//! Starts the Axum HTTP server and the reconciliation worker. Binds to a
//! configurable port (default 8080).

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use escrow_ledger::{InMemoryLedger, LedgerGateway};
use escrow_mirror::{MemoryMirror, MirrorStore, PgMirror};
use escrow_settlement::{
    Clock, CollaboratorConfig, Collaborators, HttpCollaborators, InMemoryDirectory,
    ReconciliationConfig, ReconciliationWorker, SettlementConfig, SettlementService, SystemClock,
};

use escrow_api::config::ApiConfig;
use escrow_api::AppState;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let api_config = ApiConfig::from_env()?;
    let settlement_config = SettlementConfig::from_env()?;
    let reconcile_config = ReconciliationConfig::from_env()?;

    // No DATABASE_URL means an in-memory mirror.
    let db_pool = escrow_mirror::init_pool()
        .await
        .context("mirror database initialization failed")?;
    let mirror: Arc<dyn MirrorStore> = match &db_pool {
        Some(pool) => Arc::new(PgMirror::new(pool.clone())),
        None => Arc::new(MemoryMirror::new()),
    };

    tracing::warn!("Using the in-memory ledger; escrow state is lost on restart");
    let ledger: Arc<dyn LedgerGateway> = Arc::new(InMemoryLedger::new());

    let collaborators = match CollaboratorConfig::from_env()? {
        Some(config) => {
            tracing::info!(?config, "Collaborator services configured");
            Collaborators::from_http(HttpCollaborators::new(config)?)
        }
        None => {
            tracing::warn!(
                "ESCROW_*_URL not set. Using the in-memory collaborator directory; \
                 no user is enrolled and no payout identity is configured."
            );
            Collaborators::from_directory(InMemoryDirectory::new())
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = SettlementService::new(
        ledger.clone(),
        mirror.clone(),
        collaborators,
        clock.clone(),
        settlement_config,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ReconciliationWorker::new(ledger, mirror, clock, reconcile_config);
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    let app = escrow_api::app(AppState::new(service, db_pool));
    let addr = api_config.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Escrow API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        tracing::error!("Reconciliation worker panicked: {e}");
    }
    Ok(())
}

//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers via
//! the `State` extractor. Everything inside is cheap to clone.

use std::sync::Arc;

use sqlx::PgPool;

use escrow_ledger::InMemoryLedger;
use escrow_mirror::MemoryMirror;
use escrow_settlement::{
    Collaborators, InMemoryDirectory, SettlementConfig, SettlementService, SystemClock,
};

#[derive(Clone)]
pub struct AppState {
    pub service: SettlementService,
    /// Mirror database, when `DATABASE_URL` is configured. Checked by the
    /// readiness probe.
    pub db_pool: Option<PgPool>,
}

impl AppState {
    pub fn new(service: SettlementService, db_pool: Option<PgPool>) -> Self {
        Self { service, db_pool }
    }

    /// Fully in-memory state over the given collaborator directory.
    pub fn in_memory(directory: InMemoryDirectory) -> Self {
        let service = SettlementService::new(
            Arc::new(InMemoryLedger::new()),
            Arc::new(MemoryMirror::new()),
            Collaborators::from_directory(directory),
            Arc::new(SystemClock),
            SettlementConfig::default(),
        );
        Self::new(service, None)
    }
}

//! # escrow-settlement — Settlement Orchestration
//!
//! Ties the pure transition engine to the authoritative ledger and the
//! mirror:
//!
//! - [`SettlementService`] runs every mutating operation through one
//!   version-checked commit loop: fetch the current version, recompute the
//!   transition from it, commit with the expected version, and on
//!   `Conflict` start over from a fresh fetch. A commit that times out has
//!   an unknown outcome and is resolved by looking up its instruction id
//!   before anything is retried.
//! - [`ReconciliationWorker`] periodically overwrites mirror rows from the
//!   ledger and quarantines courses with more than one live ledger line.
//! - [`ports`] defines the collaborator interfaces (enrollment, watch
//!   progress, payout identity); [`http`] implements them over HTTP and
//!   [`ports::InMemoryDirectory`] in memory.
//!
//! ## Crate Policy
//!
//! - Every mutating call takes an explicit [`CallerContext`]; there is no
//!   ambient session state.
//! - Errors are typed ([`SettlementError`]) and classified
//!   ([`ErrorClass`]) so callers can tell "try again" from "not possible"
//!   from "contact support".
//! - Time is read only through the [`Clock`] port.

pub mod clock;
pub mod config;
pub mod context;
pub mod engagement;
pub mod error;
pub mod http;
pub mod ports;
pub mod refund;
pub mod service;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CollaboratorConfig, ConfigError, ReconciliationConfig, SettlementConfig};
pub use context::CallerContext;
pub use engagement::{average_watch_bps, EngagementReport};
pub use error::{ErrorClass, SettlementError};
pub use http::HttpCollaborators;
pub use ports::{
    CollaboratorError, Collaborators, EnrollmentService, IdentityService, InMemoryDirectory,
    WatchProgressService,
};
pub use refund::{deposits_of, distribute_refund, RefundPlan};
pub use service::{
    CreateAccountRequest, DisputeOutcome, PaymentOutcome, PaymentRequest, ResolutionOutcome,
    SettlementService, Snapshot, WithdrawOutcome,
};
pub use worker::{ReconcileOutcome, ReconciliationReport, ReconciliationWorker};

//! # escrow-mirror — Ledger Read Cache
//!
//! A denormalized, eventually-consistent copy of each course's ledger record
//! plus display fields, for dashboards and for reads while the ledger is
//! unreachable. It is never authoritative.
//!
//! ## Write Rules
//!
//! - Rows are only written from a [`VersionedRecord`] fetched from or
//!   committed to the ledger. There is no read-modify-write on mirror data.
//! - A write carrying an older version of the same ledger line as the
//!   stored row is dropped ([`MirrorWrite::Stale`]). A write from another
//!   line always lands: after consolidation the surviving line is the
//!   ledger, whatever its version number.
//! - Quarantined courses (more than one live ledger line) refuse automatic
//!   writes ([`MirrorWrite::Quarantined`]) until [`MirrorStore::clear_drift`].
//!
//! Two stores implement [`MirrorStore`]: [`MemoryMirror`] and [`PgMirror`]
//! (PostgreSQL, enabled when `DATABASE_URL` is set; see [`init_pool`]).
//!
//! [`VersionedRecord`]: escrow_ledger::VersionedRecord

pub mod error;
pub mod memory;
pub mod postgres;
pub mod row;
pub mod store;

pub use error::MirrorError;
pub use memory::MemoryMirror;
pub use postgres::{init_pool, PgMirror};
pub use row::{DisplayFields, MirrorRow, MirrorWrite, PaymentReceipt, SyncStatus};
pub use store::MirrorStore;

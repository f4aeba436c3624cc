//! # escrow-ledger — Authoritative Ledger Gateway
//!
//! The authoritative escrow state for a course is a versioned record that
//! can be consumed by exactly one transition at a time. This crate defines
//! the [`LedgerGateway`] port through which the settlement layer reads the
//! current version and commits the next one, and an [`InMemoryLedger`]
//! implementation used for development and tests.
//!
//! ## Commit Semantics
//!
//! `commit(course, expected_version, next, instruction)` is a
//! compare-and-swap:
//!
//! - If the current version is not `expected_version`, nothing happens and
//!   [`LedgerError::Conflict`] is returned. The caller must re-fetch and
//!   recompute the transition from the new base.
//! - If `instruction.id` was already committed for this course, nothing
//!   happens and [`LedgerError::DuplicateInstruction`] reports the version
//!   it produced. This is how idempotency keys and timed-out commits are
//!   resolved without double payouts.
//! - Otherwise the new version and its payout instruction are stored
//!   together, atomically.
//!
//! ## Record Lines
//!
//! Legacy imports keyed courses by a non-unique human id, so a course may
//! have more than one live record line. Reads and commits against such a
//! course fail with [`LedgerError::Ambiguous`] until an operator retires
//! the extra lines; [`LedgerGateway::candidates`] lists them.
//!
//! Versions are numbered per line. Every [`VersionedRecord`] names its line,
//! so a reader can tell a newer version from one on a different line.

pub mod error;
pub mod gateway;
pub mod instruction;
pub mod memory;

pub use error::LedgerError;
pub use gateway::{LedgerCandidate, LedgerGateway, LineId, Version, VersionedRecord};
pub use instruction::{
    CommittedEntry, Deposit, InstructionId, PayerShare, PayoutInstruction, PayoutTarget,
};
pub use memory::{FaultPlan, InMemoryLedger};

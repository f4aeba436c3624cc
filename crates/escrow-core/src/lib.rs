//! # escrow-core — Foundational Types for the Course Escrow Engine
//!
//! Every other crate in the workspace depends on `escrow-core`; it depends on
//! nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `CourseId`, `IdentityHandle`,
//!    `UserId` are distinct types with validated constructors. A payee handle
//!    cannot be passed where a course id is expected.
//!
//! 2. **Content-addressed course ids.** `CourseId` is the SHA-256 of the
//!    human course id under a fixed domain prefix. Stable and comparable,
//!    but not reversible.
//!
//! 3. **Integer money.** Amounts are `u64` in the smallest currency unit.
//!    Percentages go through [`amount::percent_of`] / [`amount::bps_of`],
//!    which floor through a `u128` intermediate.
//!
//! 4. **UTC-only timestamps.** [`Timestamp`] is UTC with seconds precision.
//!
//! 5. **Checkable invariants.** [`AccountRecord::check_invariants`] returns a
//!    typed [`InvariantViolation`] instead of panicking.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `escrow-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod amount;
pub mod error;
pub mod identity;
pub mod record;
pub mod temporal;

pub use amount::{
    bps_of, percent_of, Amount, BPS_DENOMINATOR, DISPUTE_WINDOW_DAYS, MAX_RATING_TENTHS,
    MIN_WATCH_BPS, PLATFORM_FEE_BPS, TRANCHE30_MIN_PAYMENTS, TRANCHE30_PERCENT, TRANCHE40_PERCENT,
};
pub use error::CoreError;
pub use identity::{CourseId, IdentityHandle, UserId};
pub use record::{AccountRecord, AccountStatus, InvariantViolation};
pub use temporal::Timestamp;

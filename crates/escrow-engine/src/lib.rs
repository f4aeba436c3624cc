//! # escrow-engine — Escrow Transition Engine
//!
//! Pure, synchronous functions that compute the next [`AccountRecord`] and
//! the payout for each transition kind. Nothing here performs I/O, reads the
//! clock, or mutates its input: the caller supplies `now` and every
//! external signal, and receives a [`TransitionOutcome`] to commit.
//!
//! ## Transition Kinds
//!
//! | Transition | Function | Payout |
//! |---|---|---|
//! | AddPayment | [`apply_add_payment`] | 30% of the pool on the 5th payment, then 30% of each deposit |
//! | ReleaseInitial | [`apply_release_initial`] | 30% of locked (manual policy only) |
//! | ReleaseTranche40 | [`apply_release_tranche40`] | 40% of locked |
//! | ReleaseFinal | [`apply_release_final`] | 100% of locked |
//! | Dispute | [`apply_dispute`] | none |
//! | ResolveDispute | [`apply_resolve_dispute`] | remainder to payee or payers |
//!
//! [`apply`] dispatches a closed [`Transition`] enum exhaustively, so a new
//! variant forces every consumer to handle it.
//!
//! Every produced record is checked with
//! [`AccountRecord::check_invariants`] before it is returned.
//!
//! [`AccountRecord`]: escrow_core::AccountRecord
//! [`AccountRecord::check_invariants`]: escrow_core::AccountRecord::check_invariants

pub mod engine;
pub mod error;
pub mod transition;

pub use engine::{
    apply, apply_add_payment, apply_dispute, apply_release_final, apply_release_initial,
    apply_release_tranche40, apply_resolve_dispute,
};
pub use error::TransitionError;
pub use transition::{
    DisputeRequest, Engagement, InitialReleasePolicy, PaymentSignals, Payout, PayoutRecipient,
    ResolutionAction, Tranche, Transition, TransitionKind, TransitionOutcome,
};

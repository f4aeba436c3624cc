//! # Account Record
//!
//! The authoritative escrow state for one course. A record is never mutated
//! in place by the settlement path: each transition consumes the current
//! version and produces the next one, and the ledger swaps the current
//! pointer on a successful commit.
//!
//! ## Lifecycle
//!
//! ```text
//! Pending ──file dispute──▶ Disputed ──resolve(Refund)──▶ Refunded
//!    │                          │
//!    │                          └──resolve(Release)──▶ Released
//!    └──release final──▶ Released
//! ```
//!
//! `Released` and `Refunded` are terminal.
//!
//! ## Invariants
//!
//! - `locked + released + refunded == deposited` (conservation).
//! - `tranche30_released ⇒ paid_count ≥ 5`.
//! - `tranche40_released ⇒ tranche30_released`.
//! - `tranche_final_released ⇒ tranche40_released ∧ status != Disputed`.
//! - `dispute_deadline` is set iff `first_watch_at` is set, and equals
//!   `first_watch_at + 14 days`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::amount::{Amount, DISPUTE_WINDOW_DAYS, TRANCHE30_MIN_PAYMENTS};
use crate::identity::{CourseId, IdentityHandle};
use crate::temporal::Timestamp;

/// Escrow lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    /// Accepting payments and tranche releases.
    Pending,
    /// A dispute freezes the final release until resolved.
    Disputed,
    /// Remainder paid to the payee. Terminal.
    Released,
    /// Remainder returned to payers. Terminal.
    Refunded,
}

impl AccountStatus {
    /// The canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Disputed => "DISPUTED",
            Self::Released => "RELEASED",
            Self::Refunded => "REFUNDED",
        }
    }

    /// Parse the canonical string name.
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "DISPUTED" => Some(Self::Disputed),
            "RELEASED" => Some(Self::Released),
            "REFUNDED" => Some(Self::Refunded),
            _ => None,
        }
    }

    /// Whether no further transitions are accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The versioned escrow state for one course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Content-addressed course identifier.
    pub course_id: CourseId,
    /// Receives tranche payouts. Immutable after creation.
    pub payee: IdentityHandle,
    /// Attests engagement and resolves disputes. Immutable after creation.
    pub oracle: IdentityHandle,
    /// Funds awaiting release.
    pub locked: Amount,
    /// Cumulative amount paid to the payee.
    pub released: Amount,
    /// Cumulative amount returned to payers.
    pub refunded: Amount,
    /// Sum of every net amount ever added.
    pub deposited: Amount,
    /// Number of applied AddPayment transitions.
    pub paid_count: u64,
    pub tranche30_released: bool,
    pub tranche40_released: bool,
    pub tranche_final_released: bool,
    pub comment_count: u64,
    /// Sum of ratings in tenths of a star.
    pub rating_sum: u64,
    pub rating_count: u64,
    /// AND of every payment's watch-met flag.
    pub all_watch_met: bool,
    pub first_watch_at: Option<Timestamp>,
    pub dispute_deadline: Option<Timestamp>,
    pub status: AccountStatus,
}

impl AccountRecord {
    /// A zero-balance record for a newly monetized course.
    pub fn open(course_id: CourseId, payee: IdentityHandle, oracle: IdentityHandle) -> Self {
        Self {
            course_id,
            payee,
            oracle,
            locked: 0,
            released: 0,
            refunded: 0,
            deposited: 0,
            paid_count: 0,
            tranche30_released: false,
            tranche40_released: false,
            tranche_final_released: false,
            comment_count: 0,
            rating_sum: 0,
            rating_count: 0,
            all_watch_met: true,
            first_watch_at: None,
            dispute_deadline: None,
            status: AccountStatus::Pending,
        }
    }

    /// Average rating in tenths of a star, floored. `None` before any rating.
    pub fn average_rating_tenths(&self) -> Option<u64> {
        if self.rating_count == 0 {
            None
        } else {
            Some(self.rating_sum / self.rating_count)
        }
    }

    /// Whether at least one rating and one comment have been recorded.
    pub fn has_rating_and_comment(&self) -> bool {
        self.rating_count > 0 && self.comment_count > 0
    }

    /// Verify every structural invariant of the record.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvariantViolation`] found.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let accounted = (self.locked as u128) + (self.released as u128) + (self.refunded as u128);
        if accounted != self.deposited as u128 {
            return Err(InvariantViolation::Conservation {
                locked: self.locked,
                released: self.released,
                refunded: self.refunded,
                deposited: self.deposited,
            });
        }
        if self.tranche30_released && self.paid_count < TRANCHE30_MIN_PAYMENTS {
            return Err(InvariantViolation::Tranche30BeforeThreshold {
                paid_count: self.paid_count,
            });
        }
        if self.tranche40_released && !self.tranche30_released {
            return Err(InvariantViolation::TrancheOrder {
                tranche: "tranche40",
                requires: "tranche30",
            });
        }
        if self.tranche_final_released && !self.tranche40_released {
            return Err(InvariantViolation::TrancheOrder {
                tranche: "final",
                requires: "tranche40",
            });
        }
        if self.tranche_final_released && self.status == AccountStatus::Disputed {
            return Err(InvariantViolation::FinalWhileDisputed);
        }
        match (self.first_watch_at, self.dispute_deadline) {
            (None, None) => {}
            (Some(first), Some(deadline)) => {
                if first.checked_add_days(DISPUTE_WINDOW_DAYS) != Some(deadline) {
                    return Err(InvariantViolation::DeadlineMismatch);
                }
            }
            _ => return Err(InvariantViolation::DeadlineMismatch),
        }
        Ok(())
    }
}

/// A structural invariant of [`AccountRecord`] does not hold.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error(
        "conservation violated: locked {locked} + released {released} + refunded {refunded} != deposited {deposited}"
    )]
    Conservation {
        locked: Amount,
        released: Amount,
        refunded: Amount,
        deposited: Amount,
    },

    #[error("tranche30 released with only {paid_count} payments")]
    Tranche30BeforeThreshold { paid_count: u64 },

    #[error("{tranche} released before {requires}")]
    TrancheOrder {
        tranche: &'static str,
        requires: &'static str,
    },

    #[error("final tranche released while disputed")]
    FinalWhileDisputed,

    #[error("dispute deadline is not first_watch_at + 14 days")]
    DeadlineMismatch,
}

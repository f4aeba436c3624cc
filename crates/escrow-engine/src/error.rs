//! Transition engine errors.

use escrow_core::{InvariantViolation, Timestamp};
use thiserror::Error;

use crate::transition::TransitionKind;

/// Why a transition was refused.
///
/// None of these are retryable by recomputation alone: the caller must
/// change its inputs or wait for external state to change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// Preconditions of the transition do not hold for the current record.
    #[error("{kind} not allowed: {reason}")]
    InvalidState {
        kind: TransitionKind,
        reason: String,
    },

    /// Threshold or engagement criteria are not met yet.
    #[error("not eligible: {0}")]
    NotEligible(String),

    /// The dispute window has not elapsed. `deadline` is `None` when no
    /// watch event has been recorded yet.
    #[error("dispute window has not elapsed (deadline {deadline:?}, now {now})")]
    WindowNotElapsed {
        deadline: Option<Timestamp>,
        now: Timestamp,
    },

    /// The dispute window has already closed.
    #[error("dispute window closed at {deadline} (now {now})")]
    WindowClosed { deadline: Timestamp, now: Timestamp },

    /// The final release is frozen by an open dispute.
    #[error("final release blocked by an open dispute")]
    Blocked,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("arithmetic overflow computing {0}")]
    ArithmeticOverflow(&'static str),

    /// The computed record would break a structural invariant. Indicates a
    /// corrupted input record.
    #[error("invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl TransitionError {
    pub(crate) fn invalid_state(kind: TransitionKind, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            kind,
            reason: reason.into(),
        }
    }
}

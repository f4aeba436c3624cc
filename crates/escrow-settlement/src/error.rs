//! # Settlement Errors
//!
//! Every failure reaches the caller as a typed [`SettlementError`]. Version
//! conflicts are retried internally and only surface as
//! [`SettlementError::Congested`] once the retry budget is spent.

use serde::Serialize;
use thiserror::Error;

use escrow_core::{CoreError, CourseId, Timestamp, UserId};
use escrow_engine::TransitionError;
use escrow_ledger::{LedgerError, Version};
use escrow_mirror::MirrorError;

use crate::ports::CollaboratorError;

/// How a UI should present a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient; the same request may succeed later.
    TryAgain,
    /// The action is not possible in the current state or for this caller.
    NotPossible,
    /// Needs an operator.
    ContactSupport,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("no escrow account for {0}")]
    NotFound(CourseId),

    #[error("escrow account already exists for {0}")]
    AlreadyExists(CourseId),

    #[error("{0} has no payout identity configured")]
    PayeeNotConfigured(UserId),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not eligible: {0}")]
    NotEligible(String),

    #[error("dispute window has not elapsed (deadline {deadline:?}, now {now})")]
    WindowNotElapsed {
        deadline: Option<Timestamp>,
        now: Timestamp,
    },

    #[error("dispute window closed at {deadline}")]
    WindowClosed { deadline: Timestamp, now: Timestamp },

    #[error("final release blocked by an open dispute")]
    Blocked,

    #[error("version conflict: expected {expected}, current {actual}")]
    Conflict { expected: Version, actual: Version },

    #[error("ledger congested after {attempts} attempts")]
    Congested { attempts: u32 },

    #[error("{course} has {candidates} live ledger records; manual consolidation required")]
    DriftAmbiguous { course: CourseId, candidates: usize },

    #[error("external service failure: {0}")]
    ExternalServiceFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SettlementError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Conflict { .. } | Self::Congested { .. } | Self::ExternalServiceFailure(_) => {
                ErrorClass::TryAgain
            }
            Self::Unauthorized(_)
            | Self::NotFound(_)
            | Self::AlreadyExists(_)
            | Self::PayeeNotConfigured(_)
            | Self::Validation(_)
            | Self::InvalidState(_)
            | Self::NotEligible(_)
            | Self::WindowNotElapsed { .. }
            | Self::WindowClosed { .. }
            | Self::Blocked => ErrorClass::NotPossible,
            Self::DriftAmbiguous { .. } | Self::Internal(_) => ErrorClass::ContactSupport,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::PayeeNotConfigured(_) => "PAYEE_NOT_CONFIGURED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::NotEligible(_) => "NOT_ELIGIBLE",
            Self::WindowNotElapsed { .. } => "WINDOW_NOT_ELAPSED",
            Self::WindowClosed { .. } => "WINDOW_CLOSED",
            Self::Blocked => "BLOCKED",
            Self::Conflict { .. } => "CONFLICT",
            Self::Congested { .. } => "CONGESTED",
            Self::DriftAmbiguous { .. } => "DRIFT_AMBIGUOUS",
            Self::ExternalServiceFailure(_) => "EXTERNAL_SERVICE_FAILURE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<TransitionError> for SettlementError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::InvalidState { .. } => Self::InvalidState(err.to_string()),
            TransitionError::NotEligible(reason) => Self::NotEligible(reason),
            TransitionError::WindowNotElapsed { deadline, now } => {
                Self::WindowNotElapsed { deadline, now }
            }
            TransitionError::WindowClosed { deadline, now } => Self::WindowClosed { deadline, now },
            TransitionError::Blocked => Self::Blocked,
            TransitionError::Unauthorized(reason) => Self::Unauthorized(reason),
            TransitionError::InvalidInput(reason) => Self::Validation(reason),
            TransitionError::ArithmeticOverflow(_) | TransitionError::Invariant(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<LedgerError> for SettlementError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(course) => Self::NotFound(course),
            LedgerError::AlreadyExists(course) => Self::AlreadyExists(course),
            LedgerError::Conflict { expected, actual } => Self::Conflict { expected, actual },
            LedgerError::Ambiguous { course, candidates } => {
                Self::DriftAmbiguous { course, candidates }
            }
            LedgerError::Unavailable(reason) => Self::ExternalServiceFailure(reason),
            LedgerError::DuplicateInstruction { .. } | LedgerError::Rejected(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<MirrorError> for SettlementError {
    fn from(err: MirrorError) -> Self {
        Self::ExternalServiceFailure(format!("mirror: {err}"))
    }
}

impl From<CollaboratorError> for SettlementError {
    fn from(err: CollaboratorError) -> Self {
        Self::ExternalServiceFailure(err.to_string())
    }
}

impl From<CoreError> for SettlementError {
    fn from(err: CoreError) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course() -> CourseId {
        CourseId::derive("rust-101").unwrap()
    }

    #[test]
    fn retryable_errors_are_try_again() {
        assert_eq!(
            SettlementError::Congested { attempts: 4 }.class(),
            ErrorClass::TryAgain
        );
        assert_eq!(
            SettlementError::Conflict {
                expected: 1,
                actual: 2
            }
            .class(),
            ErrorClass::TryAgain
        );
        assert_eq!(
            SettlementError::ExternalServiceFailure("down".into()).class(),
            ErrorClass::TryAgain
        );
    }

    #[test]
    fn drift_needs_support() {
        let err = SettlementError::DriftAmbiguous {
            course: course(),
            candidates: 2,
        };
        assert_eq!(err.class(), ErrorClass::ContactSupport);
        assert_eq!(err.code(), "DRIFT_AMBIGUOUS");
    }

    #[test]
    fn transition_errors_map_to_taxonomy() {
        assert_eq!(
            SettlementError::from(TransitionError::Blocked),
            SettlementError::Blocked
        );
        assert!(matches!(
            SettlementError::from(TransitionError::InvalidInput("x".into())),
            SettlementError::Validation(_)
        ));
        assert!(matches!(
            SettlementError::from(TransitionError::ArithmeticOverflow("locked")),
            SettlementError::Internal(_)
        ));
    }

    #[test]
    fn ledger_errors_map_to_taxonomy() {
        assert_eq!(
            SettlementError::from(LedgerError::NotFound(course())),
            SettlementError::NotFound(course())
        );
        assert!(matches!(
            SettlementError::from(LedgerError::Ambiguous {
                course: course(),
                candidates: 3
            }),
            SettlementError::DriftAmbiguous { candidates: 3, .. }
        ));
        assert_eq!(
            SettlementError::from(LedgerError::Unavailable("x".into())).class(),
            ErrorClass::TryAgain
        );
    }
}

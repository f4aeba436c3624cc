//! Ledger gateway errors.

use escrow_core::CourseId;
use thiserror::Error;

use crate::gateway::Version;

/// Errors returned by a [`crate::LedgerGateway`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("no ledger record for {0}")]
    NotFound(CourseId),

    #[error("ledger record already exists for {0}")]
    AlreadyExists(CourseId),

    /// Another transition already consumed `expected`.
    #[error("version conflict: expected {expected}, current {actual}")]
    Conflict { expected: Version, actual: Version },

    /// The instruction was committed before and produced `version`.
    #[error("instruction already committed at version {version}")]
    DuplicateInstruction { version: Version },

    /// More than one live record line exists for the course.
    #[error("{candidates} live ledger records for {course}")]
    Ambiguous { course: CourseId, candidates: usize },

    /// The ledger refused the record itself (wrong course, broken invariant).
    #[error("record rejected: {0}")]
    Rejected(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Whether the same request may succeed if simply re-sent later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

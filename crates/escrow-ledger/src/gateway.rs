//! The ledger port consumed by the settlement layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use escrow_core::{AccountRecord, CourseId, Timestamp};

use crate::error::LedgerError;
use crate::instruction::{CommittedEntry, InstructionId, PayoutInstruction};

/// Ledger version counter. The opening version is 1.
pub type Version = u64;

/// Record line number. Versions count per line, so two versions are only
/// comparable when they belong to the same line.
pub type LineId = u32;

/// The current version of a course's record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub line: LineId,
    pub version: Version,
    pub record: AccountRecord,
}

/// One live record line for a course, as seen during drift analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCandidate {
    pub line: LineId,
    pub head: VersionedRecord,
}

/// Authoritative single-owner ledger.
///
/// Implementations must make `commit` atomic: either the new version and
/// its instruction are both durable, or neither is.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Create the opening version of a course's record.
    ///
    /// Fails with [`LedgerError::AlreadyExists`] if any line exists for the
    /// course, including terminal ones. The opening instruction is stamped
    /// with `opened_at`.
    async fn open(
        &self,
        record: AccountRecord,
        opened_at: Timestamp,
    ) -> Result<VersionedRecord, LedgerError>;

    /// The current version, or `NotFound` / `Ambiguous`.
    async fn fetch_current(&self, course: &CourseId) -> Result<VersionedRecord, LedgerError>;

    /// Replace `expected_version` with `next`, recording `instruction`.
    async fn commit(
        &self,
        course: &CourseId,
        expected_version: Version,
        next: AccountRecord,
        instruction: PayoutInstruction,
    ) -> Result<VersionedRecord, LedgerError>;

    /// Look up a previously committed instruction.
    async fn find_instruction(
        &self,
        course: &CourseId,
        id: InstructionId,
    ) -> Result<Option<CommittedEntry>, LedgerError>;

    /// Every entry of the live line, oldest first. `Ambiguous` while more
    /// than one line is live.
    async fn line_history(&self, course: &CourseId) -> Result<Vec<CommittedEntry>, LedgerError>;

    /// Every live record line for the course. More than one means drift.
    async fn candidates(&self, course: &CourseId) -> Result<Vec<LedgerCandidate>, LedgerError>;

    /// Courses with at least one live line.
    async fn list_courses(&self) -> Result<Vec<CourseId>, LedgerError>;
}

//! Mirror row types.

use serde::{Deserialize, Serialize};

use escrow_core::{AccountRecord, Amount, CourseId, Timestamp, UserId};
use escrow_ledger::{LineId, Version, VersionedRecord};

/// Whether automatic writes are accepted for a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    InSync,
    /// More than one live ledger line; writes are halted until a human
    /// consolidates them.
    DriftAmbiguous,
}

/// Display-only fields supplied when the account is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayFields {
    pub human_course_id: Option<String>,
    /// Script or address reference of the on-ledger escrow.
    pub script_ref: Option<String>,
}

/// A cached copy of one course's ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorRow {
    pub ledger_line: LineId,
    pub ledger_version: Version,
    #[serde(flatten)]
    pub record: AccountRecord,
    pub payee_wallet: String,
    #[serde(flatten)]
    pub display: DisplayFields,
    pub sync_status: SyncStatus,
    pub synced_at: Timestamp,
}

impl MirrorRow {
    pub fn from_ledger(
        state: &VersionedRecord,
        display: DisplayFields,
        synced_at: Timestamp,
    ) -> Self {
        Self {
            ledger_line: state.line,
            ledger_version: state.version,
            payee_wallet: state.record.payee.to_string(),
            record: state.record.clone(),
            display,
            sync_status: SyncStatus::InSync,
            synced_at,
        }
    }

    pub fn course_id(&self) -> &CourseId {
        &self.record.course_id
    }

    /// Whether the row already reflects `state` exactly.
    pub fn matches(&self, state: &VersionedRecord) -> bool {
        self.ledger_line == state.line
            && self.ledger_version == state.version
            && self.record == state.record
    }

    /// Whether the row holds a later version of the same line than `state`.
    /// Versions of different lines never supersede each other: after a
    /// consolidation the surviving line wins whatever its version.
    pub fn supersedes(&self, state: &VersionedRecord) -> bool {
        self.ledger_line == state.line && self.ledger_version > state.version
    }
}

/// Result of a ledger-wins upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorWrite {
    Inserted,
    Updated,
    /// The row already matched the ledger state.
    Unchanged,
    /// The row holds a newer version of the same line; the write was
    /// dropped.
    Stale { mirror_version: Version },
    /// The course is quarantined; nothing was written.
    Quarantined,
}

impl MirrorWrite {
    /// Whether the row now reflects the supplied ledger state.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Inserted | Self::Updated | Self::Unchanged)
    }
}

/// One credited payment, kept for payment history views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub course_id: CourseId,
    pub payer: UserId,
    pub gross_amount: Amount,
    pub net_amount: Amount,
    pub idempotency_key: String,
    pub recorded_at: Timestamp,
}

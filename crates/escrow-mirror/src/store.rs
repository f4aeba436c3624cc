//! The mirror port.

use async_trait::async_trait;

use escrow_core::{CourseId, Timestamp};
use escrow_ledger::VersionedRecord;

use crate::error::MirrorError;
use crate::row::{DisplayFields, MirrorRow, MirrorWrite, PaymentReceipt};

/// Read cache of the ledger. Only the settlement service and the
/// reconciliation worker write to it.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn get(&self, course: &CourseId) -> Result<Option<MirrorRow>, MirrorError>;

    /// Ledger-wins upsert.
    ///
    /// `display` replaces the stored display fields when given and keeps
    /// them otherwise.
    async fn apply_ledger_state(
        &self,
        state: &VersionedRecord,
        display: Option<&DisplayFields>,
        synced_at: Timestamp,
    ) -> Result<MirrorWrite, MirrorError>;

    async fn list(&self) -> Result<Vec<MirrorRow>, MirrorError>;

    /// Quarantine a course with `candidates` live ledger lines.
    async fn mark_drift_ambiguous(
        &self,
        course: &CourseId,
        candidates: usize,
        flagged_at: Timestamp,
    ) -> Result<(), MirrorError>;

    /// Lift a quarantine after manual consolidation. Returns whether the
    /// course was quarantined.
    async fn clear_drift(&self, course: &CourseId) -> Result<bool, MirrorError>;

    async fn is_quarantined(&self, course: &CourseId) -> Result<bool, MirrorError>;

    /// Store a receipt. Returns `false` if one with the same key exists.
    async fn record_receipt(&self, receipt: &PaymentReceipt) -> Result<bool, MirrorError>;

    /// Receipts for a course, oldest first.
    async fn receipts(&self, course: &CourseId) -> Result<Vec<PaymentReceipt>, MirrorError>;
}

//! In-memory mirror store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use escrow_core::{CourseId, Timestamp};
use escrow_ledger::VersionedRecord;

use crate::error::MirrorError;
use crate::row::{DisplayFields, MirrorRow, MirrorWrite, PaymentReceipt, SyncStatus};
use crate::store::MirrorStore;

#[derive(Default)]
struct MirrorState {
    rows: HashMap<CourseId, MirrorRow>,
    quarantine: HashMap<CourseId, usize>,
    receipts: Vec<PaymentReceipt>,
}

/// `parking_lot`-guarded mirror for development and tests.
#[derive(Clone, Default)]
pub struct MemoryMirror {
    state: Arc<RwLock<MirrorState>>,
    failing_writes: Arc<AtomicU32>,
    failing_receipts: Arc<AtomicU32>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` ledger-state writes fail with `Unavailable`.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` receipt writes fail with `Unavailable`.
    pub fn fail_next_receipts(&self, n: u32) {
        self.failing_receipts.store(n, Ordering::SeqCst);
    }

    /// Overwrite a row directly, bypassing the ledger-wins rule. Models
    /// out-of-band edits for drift tests.
    pub fn put_raw(&self, row: MirrorRow) {
        self.state.write().rows.insert(row.record.course_id, row);
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn with_sync_status(mut row: MirrorRow, state: &MirrorState) -> MirrorRow {
    row.sync_status = if state.quarantine.contains_key(&row.record.course_id) {
        SyncStatus::DriftAmbiguous
    } else {
        SyncStatus::InSync
    };
    row
}

#[async_trait]
impl MirrorStore for MemoryMirror {
    async fn get(&self, course: &CourseId) -> Result<Option<MirrorRow>, MirrorError> {
        let state = self.state.read();
        Ok(state
            .rows
            .get(course)
            .cloned()
            .map(|row| with_sync_status(row, &state)))
    }

    async fn apply_ledger_state(
        &self,
        ledger: &VersionedRecord,
        display: Option<&DisplayFields>,
        synced_at: Timestamp,
    ) -> Result<MirrorWrite, MirrorError> {
        if take_failure(&self.failing_writes) {
            return Err(MirrorError::Unavailable("injected write failure".into()));
        }
        let course = ledger.record.course_id;
        let mut state = self.state.write();
        if state.quarantine.contains_key(&course) {
            return Ok(MirrorWrite::Quarantined);
        }
        let outcome = match state.rows.get(&course) {
            None => MirrorWrite::Inserted,
            Some(row) if row.supersedes(ledger) => MirrorWrite::Stale {
                mirror_version: row.ledger_version,
            },
            Some(row) if row.matches(ledger) && display.map_or(true, |d| *d == row.display) => {
                MirrorWrite::Unchanged
            }
            Some(_) => MirrorWrite::Updated,
        };
        if matches!(outcome, MirrorWrite::Inserted | MirrorWrite::Updated) {
            let display = match display {
                Some(d) => d.clone(),
                None => state
                    .rows
                    .get(&course)
                    .map(|r| r.display.clone())
                    .unwrap_or_default(),
            };
            state
                .rows
                .insert(course, MirrorRow::from_ledger(ledger, display, synced_at));
        }
        Ok(outcome)
    }

    async fn list(&self) -> Result<Vec<MirrorRow>, MirrorError> {
        let state = self.state.read();
        let mut rows: Vec<MirrorRow> = state
            .rows
            .values()
            .cloned()
            .map(|row| with_sync_status(row, &state))
            .collect();
        rows.sort_by(|a, b| a.record.course_id.cmp(&b.record.course_id));
        Ok(rows)
    }

    async fn mark_drift_ambiguous(
        &self,
        course: &CourseId,
        candidates: usize,
        _flagged_at: Timestamp,
    ) -> Result<(), MirrorError> {
        self.state.write().quarantine.insert(*course, candidates);
        Ok(())
    }

    async fn clear_drift(&self, course: &CourseId) -> Result<bool, MirrorError> {
        Ok(self.state.write().quarantine.remove(course).is_some())
    }

    async fn is_quarantined(&self, course: &CourseId) -> Result<bool, MirrorError> {
        Ok(self.state.read().quarantine.contains_key(course))
    }

    async fn record_receipt(&self, receipt: &PaymentReceipt) -> Result<bool, MirrorError> {
        if take_failure(&self.failing_receipts) {
            return Err(MirrorError::Unavailable("injected receipt failure".into()));
        }
        let mut state = self.state.write();
        let exists = state.receipts.iter().any(|r| {
            r.course_id == receipt.course_id && r.idempotency_key == receipt.idempotency_key
        });
        if exists {
            return Ok(false);
        }
        state.receipts.push(receipt.clone());
        Ok(true)
    }

    async fn receipts(&self, course: &CourseId) -> Result<Vec<PaymentReceipt>, MirrorError> {
        Ok(self
            .state
            .read()
            .receipts
            .iter()
            .filter(|r| r.course_id == *course)
            .cloned()
            .collect())
    }
}

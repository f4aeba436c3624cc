//! # Reconciliation Worker
//!
//! Walks every course on a fixed interval and overwrites its mirror row from
//! the ledger head. The ledger always wins; mirror values are never merged
//! back.
//!
//! A course with more than one live ledger line is quarantined: the mirror
//! row is flagged `DriftAmbiguous` and automatic writes stop until an
//! operator retires the extra lines and calls
//! [`ReconciliationWorker::release_quarantine`]. Neither line is ever
//! picked arbitrarily. Once released, the surviving line overwrites the
//! row even if the retired line had reached a higher version.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use escrow_core::CourseId;
use escrow_ledger::{LedgerGateway, LineId, Version};
use escrow_mirror::{MirrorStore, MirrorWrite};

use crate::clock::Clock;
use crate::config::ReconciliationConfig;
use crate::error::SettlementError;

/// What one reconciliation pass did for one course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    InSync { version: Version },
    /// The mirror row was missing or differed and was overwritten.
    Repaired { from: Option<Version>, to: Version },
    /// Drift was detected on this pass.
    Quarantined { candidates: usize },
    /// Quarantined earlier and not yet released.
    StillQuarantined { candidates: usize },
    /// The mirror holds a newer version of the ledger head's own line.
    /// Left as is.
    MirrorAhead {
        mirror_version: Version,
        ledger_version: Version,
    },
    /// A mirror row exists but the ledger has no live line.
    MissingFromLedger,
}

/// Counts from one [`ReconciliationWorker::run_once`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub checked: usize,
    pub in_sync: usize,
    pub repaired: usize,
    pub quarantined: usize,
    pub anomalies: usize,
    pub failed: usize,
}

impl ReconciliationReport {
    fn record(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::InSync { .. } => self.in_sync += 1,
            ReconcileOutcome::Repaired { .. } => self.repaired += 1,
            ReconcileOutcome::Quarantined { .. } | ReconcileOutcome::StillQuarantined { .. } => {
                self.quarantined += 1
            }
            ReconcileOutcome::MirrorAhead { .. } | ReconcileOutcome::MissingFromLedger => {
                self.anomalies += 1
            }
        }
    }
}

#[derive(Clone)]
pub struct ReconciliationWorker {
    ledger: Arc<dyn LedgerGateway>,
    mirror: Arc<dyn MirrorStore>,
    clock: Arc<dyn Clock>,
    config: ReconciliationConfig,
}

impl ReconciliationWorker {
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        mirror: Arc<dyn MirrorStore>,
        clock: Arc<dyn Clock>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            ledger,
            mirror,
            clock,
            config,
        }
    }

    /// Bring one course's mirror row in line with the ledger.
    pub async fn reconcile_course(
        &self,
        course: &CourseId,
    ) -> Result<ReconcileOutcome, SettlementError> {
        let candidates = self.ledger.candidates(course).await?;

        if candidates.len() > 1 {
            if self.mirror.is_quarantined(course).await? {
                return Ok(ReconcileOutcome::StillQuarantined {
                    candidates: candidates.len(),
                });
            }
            self.mirror
                .mark_drift_ambiguous(course, candidates.len(), self.clock.now())
                .await?;
            let lines: Vec<LineId> = candidates.iter().map(|c| c.line).collect();
            tracing::error!(
                course = %course.short(),
                candidates = candidates.len(),
                lines = ?lines,
                "multiple live ledger records; course quarantined until consolidated"
            );
            return Ok(ReconcileOutcome::Quarantined {
                candidates: candidates.len(),
            });
        }

        let Some(head) = candidates.into_iter().next().map(|c| c.head) else {
            tracing::warn!(course = %course.short(), "mirror row has no live ledger record");
            return Ok(ReconcileOutcome::MissingFromLedger);
        };

        let existing = self.mirror.get(course).await?;
        let prior = existing.as_ref().map(|row| row.ledger_version);
        if let Some(row) = existing.filter(|row| row.ledger_line != head.line) {
            tracing::warn!(
                course = %course.short(),
                mirror_line = row.ledger_line,
                ledger_line = head.line,
                "mirror row came from a retired ledger line"
            );
        }
        let write = self
            .mirror
            .apply_ledger_state(&head, None, self.clock.now())
            .await?;
        let outcome = match write {
            MirrorWrite::Inserted | MirrorWrite::Updated => {
                tracing::info!(
                    course = %course.short(),
                    from = ?prior,
                    version = head.version,
                    "mirror row repaired from ledger"
                );
                ReconcileOutcome::Repaired {
                    from: prior,
                    to: head.version,
                }
            }
            MirrorWrite::Unchanged => ReconcileOutcome::InSync {
                version: head.version,
            },
            MirrorWrite::Stale { mirror_version } => {
                tracing::warn!(
                    course = %course.short(),
                    line = head.line,
                    mirror_version,
                    ledger_version = head.version,
                    "mirror is ahead of the ledger"
                );
                ReconcileOutcome::MirrorAhead {
                    mirror_version,
                    ledger_version: head.version,
                }
            }
            MirrorWrite::Quarantined => ReconcileOutcome::StillQuarantined { candidates: 1 },
        };
        Ok(outcome)
    }

    /// Lift a quarantine once the ledger is down to one live line, then
    /// resync the row.
    pub async fn release_quarantine(
        &self,
        course: &CourseId,
    ) -> Result<ReconcileOutcome, SettlementError> {
        let candidates = self.ledger.candidates(course).await?.len();
        if candidates > 1 {
            return Err(SettlementError::DriftAmbiguous {
                course: *course,
                candidates,
            });
        }
        if self.mirror.clear_drift(course).await? {
            tracing::info!(course = %course.short(), "quarantine released");
        }
        self.reconcile_course(course).await
    }

    /// One pass over every course known to the ledger or the mirror.
    pub async fn run_once(&self) -> Result<ReconciliationReport, SettlementError> {
        let mut courses: BTreeSet<CourseId> =
            self.ledger.list_courses().await?.into_iter().collect();
        match self.mirror.list().await {
            Ok(rows) => courses.extend(rows.iter().map(|row| *row.course_id())),
            Err(e) => tracing::warn!(error = %e, "failed to list mirror rows"),
        }

        let mut report = ReconciliationReport::default();
        for course in &courses {
            report.checked += 1;
            match self.reconcile_course(course).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(course = %course.short(), error = %e, "reconciliation failed");
                }
            }
        }

        tracing::debug!(
            checked = report.checked,
            repaired = report.repaired,
            quarantined = report.quarantined,
            failed = report.failed,
            "reconciliation pass complete"
        );
        Ok(report)
    }

    /// Run passes on the configured interval until `shutdown` turns true or
    /// its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            tracing::info!("reconciliation worker disabled");
            return;
        }
        tracing::info!(interval = ?self.config.interval, "starting reconciliation worker");

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::warn!(error = %e, "reconciliation pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("reconciliation worker stopped");
    }
}

//! # In-Memory Ledger
//!
//! An arena of immutable versions per record line. The current pointer of
//! a line is its last entry; a commit appends only if the caller's expected
//! version is still the head. All state sits behind one `parking_lot`
//! lock that is never held across an `.await`.
//!
//! A [`FaultPlan`] lets tests inject conflicts, outages and slow commits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use escrow_core::{AccountRecord, CourseId, Timestamp};
use escrow_engine::TransitionKind;

use crate::error::LedgerError;
use crate::gateway::{LedgerCandidate, LedgerGateway, LineId, Version, VersionedRecord};
use crate::instruction::{CommittedEntry, InstructionId, PayoutInstruction};

/// Failures to inject into upcoming calls. Counters are consumed one per
/// affected call.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Commits that fail with `Conflict` even though the version matches.
    pub spurious_conflicts: u32,
    /// `fetch_current` calls that fail with `Unavailable`.
    pub unavailable_reads: u32,
    /// Commits that fail with `Unavailable` before touching state.
    pub unavailable_commits: u32,
    /// The next successful commit applies, then stalls this long before
    /// answering.
    pub stall_after_apply: Option<Duration>,
}

struct RecordLine {
    line: LineId,
    /// `versions[i]` holds version `i + 1`.
    versions: Vec<CommittedEntry>,
    retired: bool,
}

impl RecordLine {
    fn head(&self) -> &CommittedEntry {
        // Lines are created with their opening version.
        &self.versions[self.versions.len() - 1]
    }

    fn head_record(&self) -> VersionedRecord {
        let head = self.head();
        VersionedRecord {
            line: self.line,
            version: head.version,
            record: head.record.clone(),
        }
    }
}

#[derive(Default)]
struct Arena {
    lines: HashMap<CourseId, Vec<RecordLine>>,
    next_line: LineId,
}

impl Arena {
    fn new_line(
        &mut self,
        course: CourseId,
        record: AccountRecord,
        opened_at: Timestamp,
    ) -> VersionedRecord {
        let line = self.next_line;
        self.next_line += 1;
        let entry = CommittedEntry {
            course_id: course,
            line,
            version: 1,
            record,
            instruction: PayoutInstruction::no_payout(
                InstructionId::new(),
                TransitionKind::Open,
                opened_at,
            ),
        };
        let opened = RecordLine {
            line,
            versions: vec![entry],
            retired: false,
        };
        let head = opened.head_record();
        self.lines.entry(course).or_default().push(opened);
        head
    }

    fn live_line(&self, course: &CourseId) -> Result<&RecordLine, LedgerError> {
        let lines = self.lines.get(course).ok_or(LedgerError::NotFound(*course))?;
        let mut live = lines.iter().filter(|l| !l.retired);
        match (live.next(), live.next()) {
            (None, _) => Err(LedgerError::NotFound(*course)),
            (Some(line), None) => Ok(line),
            (Some(_), Some(_)) => Err(LedgerError::Ambiguous {
                course: *course,
                candidates: lines.iter().filter(|l| !l.retired).count(),
            }),
        }
    }

    fn find_entry(&self, course: &CourseId, id: InstructionId) -> Option<&CommittedEntry> {
        self.lines
            .get(course)?
            .iter()
            .flat_map(|l| l.versions.iter())
            .find(|e| e.instruction.id == id)
    }
}

/// Versioned arena ledger for development and tests.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    arena: Arc<RwLock<Arena>>,
    faults: Arc<Mutex<FaultPlan>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pending fault plan.
    pub fn set_faults(&self, plan: FaultPlan) {
        *self.faults.lock() = plan;
    }

    /// Add a second live line for a course, as produced by legacy imports
    /// keyed on non-unique human ids. Returns the new line number.
    pub fn import_duplicate_line(&self, record: AccountRecord, imported_at: Timestamp) -> LineId {
        let course = record.course_id;
        let line = self.arena.write().new_line(course, record, imported_at).line;
        tracing::warn!(course = %course.short(), line, "imported duplicate ledger line");
        line
    }

    /// Retire a line after manual consolidation. Retired lines keep their
    /// history but no longer count as live.
    pub fn retire_line(&self, course: &CourseId, line: LineId) -> Result<(), LedgerError> {
        let mut arena = self.arena.write();
        let target = arena
            .lines
            .get_mut(course)
            .and_then(|lines| lines.iter_mut().find(|l| l.line == line))
            .ok_or(LedgerError::NotFound(*course))?;
        target.retired = true;
        tracing::info!(course = %course.short(), line, "retired ledger line");
        Ok(())
    }

    /// Every committed entry of the course's lines, oldest first per line.
    pub fn history(&self, course: &CourseId) -> Vec<CommittedEntry> {
        self.arena
            .read()
            .lines
            .get(course)
            .map(|lines| {
                lines
                    .iter()
                    .flat_map(|l| l.versions.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn validate(course: &CourseId, next: &AccountRecord) -> Result<(), LedgerError> {
        if next.course_id != *course {
            return Err(LedgerError::Rejected(format!(
                "record belongs to {}, not {course}",
                next.course_id
            )));
        }
        next.check_invariants()
            .map_err(|e| LedgerError::Rejected(e.to_string()))
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn open(
        &self,
        record: AccountRecord,
        opened_at: Timestamp,
    ) -> Result<VersionedRecord, LedgerError> {
        let course = record.course_id;
        Self::validate(&course, &record)?;
        let mut arena = self.arena.write();
        if arena.lines.get(&course).is_some_and(|l| !l.is_empty()) {
            return Err(LedgerError::AlreadyExists(course));
        }
        let opened = arena.new_line(course, record, opened_at);
        tracing::debug!(course = %course.short(), line = opened.line, "opened ledger record");
        Ok(opened)
    }

    async fn fetch_current(&self, course: &CourseId) -> Result<VersionedRecord, LedgerError> {
        {
            let mut faults = self.faults.lock();
            if faults.unavailable_reads > 0 {
                faults.unavailable_reads -= 1;
                return Err(LedgerError::Unavailable("injected read outage".into()));
            }
        }
        let arena = self.arena.read();
        Ok(arena.live_line(course)?.head_record())
    }

    async fn commit(
        &self,
        course: &CourseId,
        expected_version: Version,
        next: AccountRecord,
        instruction: PayoutInstruction,
    ) -> Result<VersionedRecord, LedgerError> {
        Self::validate(course, &next)?;

        let (spurious_conflict, stall) = {
            let mut faults = self.faults.lock();
            if faults.unavailable_commits > 0 {
                faults.unavailable_commits -= 1;
                return Err(LedgerError::Unavailable("injected commit outage".into()));
            }
            let spurious = faults.spurious_conflicts > 0;
            if spurious {
                faults.spurious_conflicts -= 1;
            }
            (spurious, faults.stall_after_apply)
        };

        let committed = {
            let mut arena = self.arena.write();
            if let Some(prior) = arena.find_entry(course, instruction.id) {
                return Err(LedgerError::DuplicateInstruction {
                    version: prior.version,
                });
            }
            let head = arena.live_line(course)?.head();
            if head.version != expected_version || spurious_conflict {
                return Err(LedgerError::Conflict {
                    expected: expected_version,
                    actual: head.version,
                });
            }
            if head.record.payee != next.payee || head.record.oracle != next.oracle {
                return Err(LedgerError::Rejected(
                    "payee and oracle are immutable".into(),
                ));
            }
            let line_id = arena.live_line(course)?.line;
            let line = arena
                .lines
                .get_mut(course)
                .and_then(|lines| lines.iter_mut().find(|l| l.line == line_id))
                .ok_or(LedgerError::NotFound(*course))?;
            let version = expected_version + 1;
            line.versions.push(CommittedEntry {
                course_id: *course,
                line: line_id,
                version,
                record: next.clone(),
                instruction,
            });
            VersionedRecord {
                line: line_id,
                version,
                record: next,
            }
        };

        tracing::debug!(
            course = %course.short(),
            version = committed.version,
            "committed ledger version"
        );

        if let Some(delay) = stall {
            self.faults.lock().stall_after_apply = None;
            tokio::time::sleep(delay).await;
        }
        Ok(committed)
    }

    async fn find_instruction(
        &self,
        course: &CourseId,
        id: InstructionId,
    ) -> Result<Option<CommittedEntry>, LedgerError> {
        Ok(self.arena.read().find_entry(course, id).cloned())
    }

    async fn line_history(&self, course: &CourseId) -> Result<Vec<CommittedEntry>, LedgerError> {
        let arena = self.arena.read();
        Ok(arena.live_line(course)?.versions.clone())
    }

    async fn candidates(&self, course: &CourseId) -> Result<Vec<LedgerCandidate>, LedgerError> {
        let arena = self.arena.read();
        Ok(arena
            .lines
            .get(course)
            .map(|lines| {
                lines
                    .iter()
                    .filter(|l| !l.retired)
                    .map(|l| LedgerCandidate {
                        line: l.line,
                        head: l.head_record(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_courses(&self) -> Result<Vec<CourseId>, LedgerError> {
        let arena = self.arena.read();
        let mut courses: Vec<CourseId> = arena
            .lines
            .iter()
            .filter(|(_, lines)| lines.iter().any(|l| !l.retired))
            .map(|(course, _)| *course)
            .collect();
        courses.sort();
        Ok(courses)
    }
}

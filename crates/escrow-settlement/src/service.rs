//! # Settlement Service
//!
//! Public operations for the operator/UI layer. Every mutation goes through
//! [`SettlementService::execute`], the version-checked commit loop:
//!
//! ```text
//! loop (bounded):
//!   current  = ledger.fetch_current(course)          (reads retried on outage)
//!   outcome  = engine.apply(current.record, input)   (pure, recomputed each time)
//!   result   = timeout(ledger.commit(course, current.version, outcome, instr))
//!   Ok            -> sync mirror, return
//!   Conflict      -> back off, loop
//!   Duplicate     -> return the originally committed result
//!   timed out     -> find_instruction(instr.id): landed -> return it, else loop
//!   anything else -> return the typed error
//! exhausted -> Congested
//! ```
//!
//! The instruction id stays the same across attempts, so a commit that
//! landed without an acknowledgement can never be applied twice.

use std::sync::Arc;

use serde::Serialize;

use escrow_core::{
    bps_of, AccountRecord, Amount, CourseId, IdentityHandle, UserId, PLATFORM_FEE_BPS,
};
use escrow_engine::{
    apply, DisputeRequest, PaymentSignals, PayoutRecipient, ResolutionAction, Tranche, Transition,
    TransitionOutcome,
};
use escrow_ledger::{
    CommittedEntry, Deposit, InstructionId, LedgerError, LedgerGateway, PayoutInstruction,
    PayoutTarget, Version, VersionedRecord,
};
use escrow_mirror::{DisplayFields, MirrorStore, MirrorWrite, PaymentReceipt, SyncStatus};

use crate::clock::Clock;
use crate::config::SettlementConfig;
use crate::context::CallerContext;
use crate::engagement::{engagement_for, EngagementReport};
use crate::error::SettlementError;
use crate::ports::Collaborators;
use crate::refund::{deposits_of, distribute_refund, RefundPlan};

/// Longest accepted dispute reason, in characters.
const MAX_REASON_CHARS: usize = 2_000;

/// Longest accepted idempotency key, in bytes.
const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

// ── Requests and outcomes ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CreateAccountRequest {
    pub human_course_id: String,
    /// User whose payout identity receives the tranches.
    pub payee: UserId,
    /// User whose payout identity attests engagement and resolves disputes.
    pub oracle: UserId,
    pub script_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub gross_amount: Amount,
    /// Caller-chosen key; a retry with the same key is not credited twice.
    pub idempotency_key: String,
    pub signals: PaymentSignals,
}

/// A record as seen by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub course_id: CourseId,
    pub ledger_version: Version,
    pub record: AccountRecord,
    /// Served from the mirror because the ledger was unreachable.
    pub stale: bool,
    /// Mirror sync status; only meaningful when `stale` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<SyncStatus>,
}

impl Snapshot {
    fn fresh(state: VersionedRecord) -> Self {
        Self {
            course_id: state.record.course_id,
            ledger_version: state.version,
            record: state.record,
            stale: false,
            sync_status: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentOutcome {
    pub snapshot: Snapshot,
    pub gross_amount: Amount,
    pub fee: Amount,
    pub net_amount: Amount,
    /// Paid to the payee as a side effect of this payment.
    pub payout: Amount,
    /// The key was seen before; nothing new was credited.
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawOutcome {
    pub snapshot: Snapshot,
    pub tranche: Tranche,
    pub payout: Amount,
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisputeOutcome {
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionOutcome {
    pub snapshot: Snapshot,
    pub action: ResolutionAction,
    pub payout: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund: Option<RefundPlan>,
    pub duplicate: bool,
}

/// Result of the commit loop.
struct Committed {
    state: VersionedRecord,
    instruction: PayoutInstruction,
    duplicate: bool,
}

impl Committed {
    fn from_entry(entry: CommittedEntry, duplicate: bool) -> Self {
        Self {
            state: VersionedRecord {
                line: entry.line,
                version: entry.version,
                record: entry.record,
            },
            instruction: entry.instruction,
            duplicate,
        }
    }
}

/// A computed transition ready to commit.
struct Prepared {
    outcome: TransitionOutcome,
    instruction: PayoutInstruction,
}

// ── Service ─────────────────────────────────────────────────────────────

/// Orchestrates the engine, the ledger and the mirror.
#[derive(Clone)]
pub struct SettlementService {
    ledger: Arc<dyn LedgerGateway>,
    mirror: Arc<dyn MirrorStore>,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    config: SettlementConfig,
}

impl SettlementService {
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        mirror: Arc<dyn MirrorStore>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            ledger,
            mirror,
            collaborators,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Open a zero-balance escrow for a newly monetized course.
    pub async fn create_account(
        &self,
        ctx: &CallerContext,
        request: CreateAccountRequest,
    ) -> Result<Snapshot, SettlementError> {
        let human_id = request.human_course_id.trim().to_string();
        let course_id = CourseId::derive(&human_id)?;

        let payee = self
            .collaborators
            .identity
            .payout_identity(&request.payee)
            .await?
            .ok_or_else(|| SettlementError::PayeeNotConfigured(request.payee.clone()))?;
        let oracle = self
            .collaborators
            .identity
            .payout_identity(&request.oracle)
            .await?
            .ok_or_else(|| {
                SettlementError::Validation(format!(
                    "oracle {} has no payout identity configured",
                    request.oracle
                ))
            })?;

        let opened = self
            .ledger
            .open(AccountRecord::open(course_id, payee, oracle), self.clock.now())
            .await?;

        tracing::info!(
            course = %course_id.short(),
            human_id = %human_id,
            caller = %ctx.user_id,
            "escrow account opened"
        );

        let display = DisplayFields {
            human_course_id: Some(human_id),
            script_ref: request.script_ref,
        };
        self.sync_mirror(&opened, Some(&display)).await;
        Ok(Snapshot::fresh(opened))
    }

    /// Credit one gross deposit, net of the 7% platform fee.
    ///
    /// The payer and amounts are committed with the instruction, so a replay
    /// reports what was credited the first time and refunds never depend on
    /// the mirror's receipts.
    pub async fn record_payment(
        &self,
        ctx: &CallerContext,
        course: &CourseId,
        request: PaymentRequest,
    ) -> Result<PaymentOutcome, SettlementError> {
        if request.gross_amount == 0 {
            return Err(SettlementError::Validation(
                "gross amount must be positive".into(),
            ));
        }
        let key = validate_key(&request.idempotency_key)?;

        let fee = bps_of(request.gross_amount, PLATFORM_FEE_BPS);
        let net_amount = request.gross_amount - fee;
        let instruction_id = InstructionId::from_idempotency_key(course, "payment", key);
        let policy = self.config.initial_release;
        let memo = format!(
            "payment gross={} net={net_amount} payer={}",
            request.gross_amount, ctx.user_id
        );
        let requested = Deposit {
            payer: ctx.user_id.clone(),
            gross_amount: request.gross_amount,
            fee,
            net_amount,
        };

        let committed = self
            .execute(course, instruction_id, |current| {
                let transition = Transition::AddPayment {
                    net_amount,
                    signals: request.signals.clone(),
                    policy,
                };
                let mut prepared =
                    self.prepare(current, &transition, instruction_id, &memo, None)?;
                prepared.instruction = prepared.instruction.with_deposit(requested.clone());
                Ok(prepared)
            })
            .await?;

        let deposit = committed
            .instruction
            .deposit
            .clone()
            .unwrap_or(requested);
        let receipt = PaymentReceipt {
            course_id: *course,
            payer: deposit.payer.clone(),
            gross_amount: deposit.gross_amount,
            net_amount: deposit.net_amount,
            idempotency_key: key.to_string(),
            recorded_at: committed.instruction.issued_at,
        };
        if let Err(e) = self.mirror.record_receipt(&receipt).await {
            tracing::warn!(
                course = %course.short(),
                error = %e,
                "failed to record payment receipt"
            );
        }

        tracing::info!(
            course = %course.short(),
            version = committed.state.version,
            payout = committed.instruction.amount,
            duplicate = committed.duplicate,
            "payment recorded"
        );

        Ok(PaymentOutcome {
            payout: committed.instruction.amount,
            duplicate: committed.duplicate,
            snapshot: Snapshot::fresh(committed.state),
            gross_amount: deposit.gross_amount,
            fee: deposit.fee,
            net_amount: deposit.net_amount,
        })
    }

    /// Engagement eligibility for the 40% tranche. Reads only.
    ///
    /// Counters come from the mirror row when one exists, otherwise from the
    /// ledger. The caller must be enrolled or be the payee or oracle.
    pub async fn evaluate_engagement(
        &self,
        ctx: &CallerContext,
        course: &CourseId,
    ) -> Result<EngagementReport, SettlementError> {
        let (record, version) = match self.mirror.get(course).await {
            Ok(Some(row)) => (row.record, row.ledger_version),
            Ok(None) => {
                let state = self.fetch_current(course).await?;
                (state.record, state.version)
            }
            Err(e) => {
                tracing::warn!(course = %course.short(), error = %e, "mirror read failed");
                let state = self.fetch_current(course).await?;
                (state.record, state.version)
            }
        };

        let enrolled = self
            .collaborators
            .enrollment
            .is_enrolled(course, &ctx.user_id)
            .await?;
        if !enrolled {
            let identity = self.caller_identity(ctx).await?;
            let is_party = identity
                .as_ref()
                .is_some_and(|id| *id == record.payee || *id == record.oracle);
            if !is_party {
                return Err(SettlementError::Unauthorized(
                    "caller is neither enrolled nor a party to the escrow".into(),
                ));
            }
        }

        let (watch_secs, duration_secs) = self.watch_totals(course).await?;
        Ok(EngagementReport::build(
            &record,
            version,
            watch_secs,
            duration_secs,
        ))
    }

    /// Release a tranche to the payee. Only the payee may withdraw.
    pub async fn withdraw(
        &self,
        ctx: &CallerContext,
        course: &CourseId,
        tranche: Tranche,
        idempotency_key: Option<&str>,
    ) -> Result<WithdrawOutcome, SettlementError> {
        let current = self.fetch_current(course).await?;
        self.require_identity(ctx, &current.record.payee, "payee")
            .await?;

        let instruction_id = match idempotency_key {
            Some(key) => InstructionId::from_idempotency_key(
                course,
                &format!("withdraw:{tranche}"),
                validate_key(key)?,
            ),
            None => InstructionId::new(),
        };
        let watch = match tranche {
            Tranche::Metrics40 => Some(self.watch_totals(course).await?),
            Tranche::Initial | Tranche::Final => None,
        };
        let memo = format!("withdraw {tranche}");

        let committed = self
            .execute(course, instruction_id, |current| {
                let (watch_secs, duration_secs) = watch.unwrap_or((0, 0));
                let engagement = engagement_for(&current.record, watch_secs, duration_secs);
                let transition = Transition::for_tranche(tranche, engagement, self.clock.now());
                self.prepare(current, &transition, instruction_id, &memo, None)
            })
            .await?;

        tracing::info!(
            course = %course.short(),
            tranche = %tranche,
            version = committed.state.version,
            payout = committed.instruction.amount,
            "tranche withdrawn"
        );

        Ok(WithdrawOutcome {
            snapshot: Snapshot::fresh(committed.state),
            tranche,
            payout: committed.instruction.amount,
            duplicate: committed.duplicate,
        })
    }

    /// Open a dispute. The requester must be enrolled and not the payee.
    pub async fn file_dispute(
        &self,
        ctx: &CallerContext,
        course: &CourseId,
        reason: &str,
    ) -> Result<DisputeOutcome, SettlementError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SettlementError::Validation(
                "dispute reason must not be empty".into(),
            ));
        }
        if reason.chars().count() > MAX_REASON_CHARS {
            return Err(SettlementError::Validation(format!(
                "dispute reason exceeds {MAX_REASON_CHARS} characters"
            )));
        }

        let enrolled = self
            .collaborators
            .enrollment
            .is_enrolled(course, &ctx.user_id)
            .await?;
        let requester = self.caller_identity(ctx).await?;
        let instruction_id = InstructionId::new();
        let memo = format!("dispute by {}: {reason}", ctx.user_id);

        let committed = self
            .execute(course, instruction_id, |current| {
                let transition = Transition::Dispute(DisputeRequest {
                    requester: requester.clone(),
                    enrolled,
                    now: self.clock.now(),
                });
                self.prepare(current, &transition, instruction_id, &memo, None)
            })
            .await?;

        tracing::warn!(
            course = %course.short(),
            version = committed.state.version,
            requester = %ctx.user_id,
            "dispute filed"
        );

        Ok(DisputeOutcome {
            snapshot: Snapshot::fresh(committed.state),
        })
    }

    /// Settle an open dispute. Only the oracle may resolve.
    pub async fn resolve_dispute(
        &self,
        ctx: &CallerContext,
        course: &CourseId,
        action: ResolutionAction,
    ) -> Result<ResolutionOutcome, SettlementError> {
        let current = self.fetch_current(course).await?;
        self.require_identity(ctx, &current.record.oracle, "oracle")
            .await?;

        let deposits = match action {
            ResolutionAction::Refund => deposits_of(&self.ledger.line_history(course).await?),
            ResolutionAction::Release => Vec::new(),
        };
        let instruction_id = InstructionId::new();
        let memo = format!("resolve {action:?} by {}", ctx.user_id);

        let committed = self
            .execute(course, instruction_id, |current| {
                let transition = Transition::ResolveDispute { action };
                let plan = match action {
                    ResolutionAction::Refund => {
                        Some(distribute_refund(current.record.locked, &deposits))
                    }
                    ResolutionAction::Release => None,
                };
                self.prepare(current, &transition, instruction_id, &memo, plan)
            })
            .await?;

        let refund = match &committed.instruction.target {
            PayoutTarget::Payers {
                shares,
                undistributed,
            } => Some(RefundPlan {
                shares: shares.clone(),
                undistributed: *undistributed,
            }),
            PayoutTarget::None | PayoutTarget::Payee { .. } => None,
        };
        if let Some(plan) = &refund {
            if plan.undistributed > 0 {
                tracing::warn!(
                    course = %course.short(),
                    undistributed = plan.undistributed,
                    "refund has no deposits to distribute against; manual handling required"
                );
            }
        }

        tracing::info!(
            course = %course.short(),
            action = ?action,
            version = committed.state.version,
            payout = committed.instruction.amount,
            "dispute resolved"
        );

        Ok(ResolutionOutcome {
            snapshot: Snapshot::fresh(committed.state),
            action,
            payout: committed.instruction.amount,
            refund,
            duplicate: committed.duplicate,
        })
    }

    /// The ledger's current record, or the mirror row flagged `stale` when
    /// the ledger is unreachable.
    pub async fn get_snapshot(&self, course: &CourseId) -> Result<Snapshot, SettlementError> {
        match self.fetch_current(course).await {
            Ok(state) => Ok(Snapshot::fresh(state)),
            Err(SettlementError::ExternalServiceFailure(reason)) => {
                tracing::warn!(
                    course = %course.short(),
                    reason = %reason,
                    "ledger unreachable, serving mirror snapshot"
                );
                match self.mirror.get(course).await? {
                    Some(row) => Ok(Snapshot {
                        course_id: row.record.course_id,
                        ledger_version: row.ledger_version,
                        record: row.record,
                        stale: true,
                        sync_status: Some(row.sync_status),
                    }),
                    None => Err(SettlementError::ExternalServiceFailure(reason)),
                }
            }
            Err(e) => Err(e),
        }
    }

    // ── Commit loop ─────────────────────────────────────────────────────

    async fn execute<F>(
        &self,
        course: &CourseId,
        instruction_id: InstructionId,
        prepare: F,
    ) -> Result<Committed, SettlementError>
    where
        F: Fn(&VersionedRecord) -> Result<Prepared, SettlementError>,
    {
        let attempts = self.config.max_commit_attempts.max(1);
        for attempt in 1..=attempts {
            let current = self.fetch_current(course).await?;
            let prepared = match prepare(&current) {
                Ok(prepared) => prepared,
                Err(e) => {
                    // A retried request whose first attempt landed sees the
                    // post-commit state and may now be refused; report the
                    // original result instead.
                    if let Some(entry) = self.find_committed(course, instruction_id).await? {
                        return Ok(Committed::from_entry(entry, true));
                    }
                    return Err(e);
                }
            };

            let commit = self.ledger.commit(
                course,
                current.version,
                prepared.outcome.next,
                prepared.instruction.clone(),
            );
            match tokio::time::timeout(self.config.commit_timeout, commit).await {
                Ok(Ok(state)) => {
                    self.sync_mirror(&state, None).await;
                    return Ok(Committed {
                        state,
                        instruction: prepared.instruction,
                        duplicate: false,
                    });
                }
                Ok(Err(LedgerError::Conflict { expected, actual })) => {
                    tracing::debug!(
                        course = %course.short(),
                        attempt,
                        expected,
                        actual,
                        "version conflict, recomputing"
                    );
                }
                Ok(Err(LedgerError::DuplicateInstruction { version })) => {
                    tracing::info!(
                        course = %course.short(),
                        version,
                        instruction = %instruction_id,
                        "instruction already committed"
                    );
                    return match self.find_committed(course, instruction_id).await? {
                        Some(entry) => Ok(Committed::from_entry(entry, true)),
                        None => Err(SettlementError::Internal(format!(
                            "ledger reported {instruction_id} as committed but cannot find it"
                        ))),
                    };
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_elapsed) => {
                    tracing::warn!(
                        course = %course.short(),
                        attempt,
                        instruction = %instruction_id,
                        timeout_ms = self.config.commit_timeout.as_millis() as u64,
                        "commit timed out, outcome unknown"
                    );
                    if let Some(entry) = self.find_committed(course, instruction_id).await? {
                        let committed = Committed::from_entry(entry, false);
                        self.sync_mirror(&committed.state, None).await;
                        return Ok(committed);
                    }
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.backoff(attempt)).await;
            }
        }

        tracing::warn!(course = %course.short(), attempts, "commit retry budget exhausted");
        Err(SettlementError::Congested { attempts })
    }

    fn prepare(
        &self,
        current: &VersionedRecord,
        transition: &Transition,
        instruction_id: InstructionId,
        memo: &str,
        refund: Option<RefundPlan>,
    ) -> Result<Prepared, SettlementError> {
        let outcome = apply(&current.record, transition)?;
        let now = self.clock.now();
        let payout = outcome.payout;
        let instruction = match payout.recipient {
            PayoutRecipient::Payee => PayoutInstruction::to_payee(
                instruction_id,
                outcome.kind,
                payout.amount,
                current.record.payee.clone(),
                now,
            ),
            PayoutRecipient::Payers => {
                let plan = refund.unwrap_or_else(|| distribute_refund(payout.amount, &[]));
                PayoutInstruction {
                    id: instruction_id,
                    kind: outcome.kind,
                    amount: payout.amount,
                    target: PayoutTarget::Payers {
                        shares: plan.shares,
                        undistributed: plan.undistributed,
                    },
                    memo: String::new(),
                    issued_at: now,
                    deposit: None,
                }
            }
        }
        .with_memo(memo);
        Ok(Prepared {
            outcome,
            instruction,
        })
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    /// `fetch_current`, retrying outages with backoff.
    async fn fetch_current(&self, course: &CourseId) -> Result<VersionedRecord, SettlementError> {
        let mut retry = 0;
        loop {
            match self.ledger.fetch_current(course).await {
                Ok(state) => return Ok(state),
                Err(e) if e.is_transient() && retry < self.config.read_retries => {
                    retry += 1;
                    let delay = self.config.backoff(retry);
                    tracing::warn!(
                        course = %course.short(),
                        attempt = retry,
                        "ledger read failed, retrying in {delay:?}: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn find_committed(
        &self,
        course: &CourseId,
        id: InstructionId,
    ) -> Result<Option<CommittedEntry>, SettlementError> {
        Ok(self.ledger.find_instruction(course, id).await?)
    }

    async fn sync_mirror(&self, state: &VersionedRecord, display: Option<&DisplayFields>) {
        let course = state.record.course_id;
        match self
            .mirror
            .apply_ledger_state(state, display, self.clock.now())
            .await
        {
            Ok(MirrorWrite::Quarantined) => tracing::warn!(
                course = %course.short(),
                version = state.version,
                "mirror row quarantined, skipping write"
            ),
            Ok(MirrorWrite::Stale { mirror_version }) => tracing::debug!(
                course = %course.short(),
                version = state.version,
                mirror_version,
                "mirror already newer"
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!(
                course = %course.short(),
                version = state.version,
                error = %e,
                "mirror write failed; reconciliation will repair it"
            ),
        }
    }

    async fn caller_identity(
        &self,
        ctx: &CallerContext,
    ) -> Result<Option<IdentityHandle>, SettlementError> {
        Ok(self
            .collaborators
            .identity
            .payout_identity(&ctx.user_id)
            .await?)
    }

    async fn require_identity(
        &self,
        ctx: &CallerContext,
        expected: &IdentityHandle,
        role: &str,
    ) -> Result<(), SettlementError> {
        match self.caller_identity(ctx).await? {
            Some(identity) if identity == *expected => Ok(()),
            _ => Err(SettlementError::Unauthorized(format!(
                "{} is not the {role} of this escrow",
                ctx.user_id
            ))),
        }
    }

    async fn watch_totals(&self, course: &CourseId) -> Result<(u64, u64), SettlementError> {
        let watch = self
            .collaborators
            .watch_progress
            .aggregated_watch_seconds(course)
            .await?;
        let duration = self
            .collaborators
            .watch_progress
            .course_duration_seconds(course)
            .await?;
        Ok((watch, duration))
    }
}

fn validate_key(key: &str) -> Result<&str, SettlementError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(SettlementError::Validation(
            "idempotency key is required".into(),
        ));
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(SettlementError::Validation(format!(
            "idempotency key exceeds {MAX_IDEMPOTENCY_KEY_LEN} bytes"
        )));
    }
    Ok(key)
}

//! # Transition Functions
//!
//! Each function takes the current record by reference and returns a fresh
//! [`TransitionOutcome`]. The input is never modified, so a caller that
//! loses a commit race can recompute from the re-fetched version without
//! any cleanup.

use escrow_core::{
    percent_of, AccountRecord, AccountStatus, Amount, Timestamp, DISPUTE_WINDOW_DAYS,
    MAX_RATING_TENTHS, MIN_WATCH_BPS, TRANCHE30_MIN_PAYMENTS, TRANCHE30_PERCENT,
    TRANCHE40_PERCENT,
};

use crate::error::TransitionError;
use crate::transition::{
    DisputeRequest, Engagement, InitialReleasePolicy, PaymentSignals, Payout, ResolutionAction,
    Transition, TransitionKind, TransitionOutcome,
};

/// Apply any transition. Exhaustive over [`Transition`].
pub fn apply(
    current: &AccountRecord,
    transition: &Transition,
) -> Result<TransitionOutcome, TransitionError> {
    match transition {
        Transition::AddPayment {
            net_amount,
            signals,
            policy,
        } => apply_add_payment(current, *net_amount, signals, *policy),
        Transition::ReleaseInitial => apply_release_initial(current),
        Transition::ReleaseTranche40 { engagement } => {
            apply_release_tranche40(current, engagement)
        }
        Transition::ReleaseFinal { now } => apply_release_final(current, *now),
        Transition::Dispute(request) => apply_dispute(current, request),
        Transition::ResolveDispute { action } => apply_resolve_dispute(current, *action),
    }
}

/// Credit one net deposit and release whatever the enrollment tranche owes.
///
/// On the payment that first brings `paid_count` to 5 (under
/// [`InitialReleasePolicy::OnThreshold`]) 30% of the whole pool is paid out.
/// Once the tranche is released, every later deposit pays 30% of itself,
/// never of the pool again.
pub fn apply_add_payment(
    current: &AccountRecord,
    net_amount: Amount,
    signals: &PaymentSignals,
    policy: InitialReleasePolicy,
) -> Result<TransitionOutcome, TransitionError> {
    const KIND: TransitionKind = TransitionKind::AddPayment;

    if current.status != AccountStatus::Pending {
        return Err(TransitionError::invalid_state(
            KIND,
            format!("account is {}", current.status),
        ));
    }
    if net_amount == 0 {
        return Err(TransitionError::InvalidInput(
            "net amount must be positive".into(),
        ));
    }
    if signals.rating_tenths > MAX_RATING_TENTHS {
        return Err(TransitionError::InvalidInput(format!(
            "rating {} exceeds {MAX_RATING_TENTHS} tenths",
            signals.rating_tenths
        )));
    }

    let mut next = current.clone();
    next.paid_count = checked(current.paid_count.checked_add(1), "paid_count")?;
    let pool = checked(current.locked.checked_add(net_amount), "locked")?;

    let payout = if current.tranche30_released {
        percent_of(net_amount, TRANCHE30_PERCENT)
    } else if policy == InitialReleasePolicy::OnThreshold
        && next.paid_count >= TRANCHE30_MIN_PAYMENTS
    {
        next.tranche30_released = true;
        percent_of(pool, TRANCHE30_PERCENT)
    } else {
        0
    };

    // payout <= pool by construction of percent_of.
    next.locked = pool - payout;
    next.released = checked(current.released.checked_add(payout), "released")?;
    next.deposited = checked(current.deposited.checked_add(net_amount), "deposited")?;

    if signals.commented {
        next.comment_count = checked(current.comment_count.checked_add(1), "comment_count")?;
    }
    if signals.rating_tenths > 0 {
        next.rating_sum = checked(
            current.rating_sum.checked_add(u64::from(signals.rating_tenths)),
            "rating_sum",
        )?;
        next.rating_count = checked(current.rating_count.checked_add(1), "rating_count")?;
    }
    next.all_watch_met = current.all_watch_met && signals.watch_met;

    if current.first_watch_at.is_none() {
        if let Some(watched_at) = signals.watched_at {
            next.first_watch_at = Some(watched_at);
            next.dispute_deadline = Some(checked(
                watched_at.checked_add_days(DISPUTE_WINDOW_DAYS),
                "dispute_deadline",
            )?);
        }
    }

    finish(KIND, next, Payout::to_payee(payout))
}

/// Explicit release of the enrollment tranche (`withdraw(Initial)`).
///
/// Under the default policy the tranche is already paid by the fifth
/// payment, so this only succeeds for accounts running the manual policy.
pub fn apply_release_initial(current: &AccountRecord) -> Result<TransitionOutcome, TransitionError> {
    const KIND: TransitionKind = TransitionKind::ReleaseInitial;

    reject_terminal(current, KIND)?;
    if current.tranche30_released {
        return Err(TransitionError::invalid_state(
            KIND,
            "enrollment tranche already released",
        ));
    }
    if current.paid_count < TRANCHE30_MIN_PAYMENTS {
        return Err(TransitionError::NotEligible(format!(
            "{} of {TRANCHE30_MIN_PAYMENTS} payments received",
            current.paid_count
        )));
    }

    let payout = percent_of(current.locked, TRANCHE30_PERCENT);
    let mut next = current.clone();
    next.locked = current.locked - payout;
    next.released = checked(current.released.checked_add(payout), "released")?;
    next.tranche30_released = true;

    finish(KIND, next, Payout::to_payee(payout))
}

/// Release 40% of the remaining pool once engagement criteria hold.
///
/// Allowed while a dispute is open: a dispute only freezes the final
/// release.
pub fn apply_release_tranche40(
    current: &AccountRecord,
    engagement: &Engagement,
) -> Result<TransitionOutcome, TransitionError> {
    const KIND: TransitionKind = TransitionKind::ReleaseTranche40;

    reject_terminal(current, KIND)?;
    if !current.tranche30_released {
        return Err(TransitionError::invalid_state(
            KIND,
            "enrollment tranche not released yet",
        ));
    }
    if current.tranche40_released {
        return Err(TransitionError::invalid_state(
            KIND,
            "engagement tranche already released",
        ));
    }
    if engagement.avg_watch_bps < MIN_WATCH_BPS {
        return Err(TransitionError::NotEligible(format!(
            "average watch {} bps below {MIN_WATCH_BPS} bps",
            engagement.avg_watch_bps
        )));
    }
    if !engagement.has_rating_and_comment {
        return Err(TransitionError::NotEligible(
            "at least one rating and one comment required".into(),
        ));
    }

    let payout = percent_of(current.locked, TRANCHE40_PERCENT);
    let mut next = current.clone();
    next.locked = current.locked - payout;
    next.released = checked(current.released.checked_add(payout), "released")?;
    next.tranche40_released = true;

    finish(KIND, next, Payout::to_payee(payout))
}

/// Drain the remainder to the payee after the dispute window.
pub fn apply_release_final(
    current: &AccountRecord,
    now: Timestamp,
) -> Result<TransitionOutcome, TransitionError> {
    const KIND: TransitionKind = TransitionKind::ReleaseFinal;

    reject_terminal(current, KIND)?;
    if !current.tranche40_released {
        return Err(TransitionError::invalid_state(
            KIND,
            "engagement tranche not released yet",
        ));
    }
    if current.status == AccountStatus::Disputed {
        return Err(TransitionError::Blocked);
    }
    match current.dispute_deadline {
        Some(deadline) if now >= deadline => {}
        deadline => return Err(TransitionError::WindowNotElapsed { deadline, now }),
    }

    drain_to_payee(current, KIND)
}

/// Open a dispute, freezing the final release.
///
/// The window is open until `dispute_deadline`; with no recorded watch event
/// there is no deadline yet and the window counts as open.
pub fn apply_dispute(
    current: &AccountRecord,
    request: &DisputeRequest,
) -> Result<TransitionOutcome, TransitionError> {
    const KIND: TransitionKind = TransitionKind::Dispute;

    if current.status != AccountStatus::Pending {
        return Err(TransitionError::invalid_state(
            KIND,
            format!("account is {}", current.status),
        ));
    }
    if !request.enrolled {
        return Err(TransitionError::Unauthorized(
            "requester is not enrolled in the course".into(),
        ));
    }
    if request.requester.as_ref() == Some(&current.payee) {
        return Err(TransitionError::Unauthorized(
            "payee cannot dispute their own course".into(),
        ));
    }
    if let Some(deadline) = current.dispute_deadline {
        if request.now >= deadline {
            return Err(TransitionError::WindowClosed {
                deadline,
                now: request.now,
            });
        }
    }

    let mut next = current.clone();
    next.status = AccountStatus::Disputed;
    finish(KIND, next, Payout::none())
}

/// Settle an open dispute.
///
/// `Release` pays the remainder to the payee without the deadline check.
/// `Refund` moves the remainder to `refunded` and tags the payout for the
/// payers; how it is split among them is the caller's decision.
pub fn apply_resolve_dispute(
    current: &AccountRecord,
    action: ResolutionAction,
) -> Result<TransitionOutcome, TransitionError> {
    let kind = match action {
        ResolutionAction::Release => TransitionKind::ResolveRelease,
        ResolutionAction::Refund => TransitionKind::ResolveRefund,
    };

    if current.status != AccountStatus::Disputed {
        return Err(TransitionError::invalid_state(
            kind,
            format!("account is {}, not DISPUTED", current.status),
        ));
    }

    match action {
        ResolutionAction::Release => {
            if !current.tranche40_released {
                return Err(TransitionError::invalid_state(
                    kind,
                    "engagement tranche must be released before the final release",
                ));
            }
            drain_to_payee(current, kind)
        }
        ResolutionAction::Refund => {
            let amount = current.locked;
            let mut next = current.clone();
            next.locked = 0;
            next.refunded = checked(current.refunded.checked_add(amount), "refunded")?;
            next.status = AccountStatus::Refunded;
            finish(kind, next, Payout::to_payers(amount))
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn drain_to_payee(
    current: &AccountRecord,
    kind: TransitionKind,
) -> Result<TransitionOutcome, TransitionError> {
    let payout = current.locked;
    let mut next = current.clone();
    next.locked = 0;
    next.released = checked(current.released.checked_add(payout), "released")?;
    next.tranche_final_released = true;
    next.status = AccountStatus::Released;
    finish(kind, next, Payout::to_payee(payout))
}

fn reject_terminal(current: &AccountRecord, kind: TransitionKind) -> Result<(), TransitionError> {
    if current.status.is_terminal() {
        return Err(TransitionError::invalid_state(
            kind,
            format!("account is {}", current.status),
        ));
    }
    Ok(())
}

fn checked<T>(value: Option<T>, what: &'static str) -> Result<T, TransitionError> {
    value.ok_or(TransitionError::ArithmeticOverflow(what))
}

fn finish(
    kind: TransitionKind,
    next: AccountRecord,
    payout: Payout,
) -> Result<TransitionOutcome, TransitionError> {
    next.check_invariants()?;
    Ok(TransitionOutcome { kind, next, payout })
}

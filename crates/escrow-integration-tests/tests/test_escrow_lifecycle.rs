//! # Escrow Lifecycle
//!
//! Full payment-to-release runs through the whole stack: settlement service,
//! engine, in-memory ledger and mirror. After every step the mirror row must
//! equal the ledger head and the record must conserve its deposits.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use escrow_core::{AccountStatus, CourseId, IdentityHandle, Timestamp, UserId};
use escrow_engine::{PaymentSignals, ResolutionAction, Tranche};
use escrow_ledger::{InMemoryLedger, LedgerGateway};
use escrow_mirror::{MemoryMirror, MirrorStore};
use escrow_settlement::{
    CallerContext, Clock, Collaborators, CreateAccountRequest, InMemoryDirectory, ManualClock,
    PaymentRequest, SettlementConfig, SettlementError, SettlementService,
};

struct Stack {
    ledger: InMemoryLedger,
    mirror: MemoryMirror,
    directory: InMemoryDirectory,
    clock: ManualClock,
    service: SettlementService,
    course: CourseId,
}

fn ctx(id: &str) -> CallerContext {
    CallerContext::new(UserId::new(id).unwrap())
}

fn learner(i: usize) -> String {
    format!("learner-{i}")
}

const LEARNERS: usize = 8;

async fn stack() -> Stack {
    let ledger = InMemoryLedger::new();
    let mirror = MemoryMirror::new();
    let directory = InMemoryDirectory::new();
    let clock = ManualClock::new(Timestamp::parse("2026-03-01T10:00:00Z").unwrap());
    let course = CourseId::derive("intro-to-escrow").unwrap();

    for (user, identity) in [("author", "addr_author"), ("oracle", "addr_oracle")] {
        directory.set_payout_identity(
            UserId::new(user).unwrap(),
            IdentityHandle::new(identity).unwrap(),
        );
    }
    for i in 1..=LEARNERS {
        let user = UserId::new(learner(i)).unwrap();
        directory.enroll(course, user.clone());
        directory.set_payout_identity(user, IdentityHandle::new(format!("addr_l{i}")).unwrap());
    }

    let service = SettlementService::new(
        Arc::new(ledger.clone()),
        Arc::new(mirror.clone()),
        Collaborators::from_directory(directory.clone()),
        Arc::new(clock.clone()),
        SettlementConfig {
            base_backoff: Duration::from_millis(1),
            ..SettlementConfig::default()
        },
    );
    service
        .create_account(
            &ctx("author"),
            CreateAccountRequest {
                human_course_id: "intro-to-escrow".into(),
                payee: UserId::new("author").unwrap(),
                oracle: UserId::new("oracle").unwrap(),
                script_ref: None,
            },
        )
        .await
        .unwrap();

    Stack {
        ledger,
        mirror,
        directory,
        clock,
        service,
        course,
    }
}

impl Stack {
    async fn pay(&self, payer: usize, key: &str, gross: u64) -> Result<u64, SettlementError> {
        let request = PaymentRequest {
            gross_amount: gross,
            idempotency_key: key.to_string(),
            signals: PaymentSignals {
                watch_met: true,
                rating_tenths: 40,
                commented: true,
                watched_at: Some(self.clock.now()),
            },
        };
        self.service
            .record_payment(&ctx(&learner(payer)), &self.course, request)
            .await
            .map(|out| out.payout)
    }

    async fn assert_consistent(&self) {
        let head = self.ledger.fetch_current(&self.course).await.unwrap();
        head.record.check_invariants().unwrap();
        let row = self.mirror.get(&self.course).await.unwrap().unwrap();
        assert_eq!(row.ledger_version, head.version);
        assert_eq!(row.record, head.record);
    }
}

#[tokio::test]
async fn fifth_payment_releases_thirty_percent() {
    let s = stack().await;
    for i in 1..=4 {
        assert_eq!(s.pay(i, &format!("k{i}"), 10_000_000).await.unwrap(), 0);
        s.assert_consistent().await;
    }
    assert_eq!(s.pay(5, "k5", 10_000_000).await.unwrap(), 13_950_000);
    s.assert_consistent().await;

    let head = s.ledger.fetch_current(&s.course).await.unwrap();
    assert_eq!(head.record.locked, 32_550_000);
    assert!(head.record.tranche30_released);

    // Later deposits pay 30% of themselves.
    assert_eq!(s.pay(6, "k6", 10_000_000).await.unwrap(), 2_790_000);
    s.assert_consistent().await;
}

#[tokio::test]
async fn engagement_tranche_then_final_after_window() {
    let s = stack().await;
    for i in 1..=5 {
        s.pay(i, &format!("k{i}"), 10_000_000).await.unwrap();
    }
    s.directory.set_watch_seconds(s.course, 3_900);
    s.directory.set_course_duration(s.course, 1_200);

    let report = s
        .service
        .evaluate_engagement(&ctx("learner-1"), &s.course)
        .await
        .unwrap();
    assert_eq!(report.avg_watch_bps, 6_500);
    assert_eq!(report.rating_count, 5);

    let b = s
        .service
        .withdraw(&ctx("author"), &s.course, Tranche::Metrics40, None)
        .await
        .unwrap();
    assert_eq!(b.payout, 13_020_000);
    assert_eq!(b.snapshot.record.locked, 19_530_000);
    s.assert_consistent().await;

    s.clock.advance_days(13);
    assert!(matches!(
        s.service
            .withdraw(&ctx("author"), &s.course, Tranche::Final, None)
            .await,
        Err(SettlementError::WindowNotElapsed { .. })
    ));

    s.clock.advance_days(1);
    let c = s
        .service
        .withdraw(&ctx("author"), &s.course, Tranche::Final, None)
        .await
        .unwrap();
    assert_eq!(c.payout, 19_530_000);
    assert_eq!(c.snapshot.record.locked, 0);
    assert_eq!(c.snapshot.record.released, 46_500_000);
    s.assert_consistent().await;

    // Terminal: no more payments.
    assert!(matches!(
        s.pay(6, "k6", 10_000_000).await,
        Err(SettlementError::InvalidState(_))
    ));
}

#[tokio::test]
async fn dispute_blocks_final_until_oracle_resolves() {
    let s = stack().await;
    for i in 1..=5 {
        s.pay(i, &format!("k{i}"), 10_000_000).await.unwrap();
    }
    s.directory.set_watch_seconds(s.course, 6_000);
    s.directory.set_course_duration(s.course, 1_200);
    s.service
        .withdraw(&ctx("author"), &s.course, Tranche::Metrics40, None)
        .await
        .unwrap();

    // The payee may not dispute their own course even if enrolled.
    s.directory
        .enroll(s.course, UserId::new("author").unwrap());
    assert!(matches!(
        s.service.file_dispute(&ctx("author"), &s.course, "self").await,
        Err(SettlementError::Unauthorized(_))
    ));

    s.service
        .file_dispute(&ctx("learner-4"), &s.course, "audio is broken")
        .await
        .unwrap();
    s.assert_consistent().await;

    s.clock.advance_days(30);
    assert_eq!(
        s.service
            .withdraw(&ctx("author"), &s.course, Tranche::Final, None)
            .await
            .unwrap_err(),
        SettlementError::Blocked
    );

    let resolved = s
        .service
        .resolve_dispute(&ctx("oracle"), &s.course, ResolutionAction::Release)
        .await
        .unwrap();
    assert_eq!(resolved.snapshot.record.status, AccountStatus::Released);
    assert_eq!(resolved.snapshot.record.locked, 0);
    s.assert_consistent().await;
}

#[tokio::test]
async fn dispute_after_deadline_is_closed() {
    let s = stack().await;
    s.pay(1, "k1", 10_000_000).await.unwrap();
    s.clock.advance_days(14);
    assert!(matches!(
        s.service
            .file_dispute(&ctx("learner-1"), &s.course, "late")
            .await,
        Err(SettlementError::WindowClosed { .. })
    ));
}

#[tokio::test]
async fn uneven_refund_is_exact() {
    let s = stack().await;
    s.pay(1, "k1", 1_000).await.unwrap();
    s.pay(2, "k2", 2_000).await.unwrap();
    s.pay(3, "k3", 3_333).await.unwrap();
    s.pay(1, "k4", 777).await.unwrap();
    s.service
        .file_dispute(&ctx("learner-2"), &s.course, "not as described")
        .await
        .unwrap();

    let resolved = s
        .service
        .resolve_dispute(&ctx("oracle"), &s.course, ResolutionAction::Refund)
        .await
        .unwrap();
    let plan = resolved.refund.unwrap();
    let total: u64 = plan.shares.iter().map(|s| s.amount).sum();
    assert_eq!(total + plan.undistributed, resolved.payout);
    assert_eq!(plan.shares.len(), 3);
    assert_eq!(resolved.snapshot.record.refunded, resolved.payout);
    s.assert_consistent().await;
}

// ── Random operation sequences ──────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Pay { payer: usize, gross: u64 },
    Withdraw(Tranche),
    Dispute { payer: usize },
    Resolve(ResolutionAction),
    AdvanceDays(i64),
    Watch(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1..=LEARNERS, 1u64..50_000_000).prop_map(|(payer, gross)| Op::Pay { payer, gross }),
        2 => prop_oneof![
            Just(Tranche::Initial),
            Just(Tranche::Metrics40),
            Just(Tranche::Final)
        ]
        .prop_map(Op::Withdraw),
        1 => (1..=LEARNERS).prop_map(|payer| Op::Dispute { payer }),
        1 => prop_oneof![Just(ResolutionAction::Release), Just(ResolutionAction::Refund)]
            .prop_map(Op::Resolve),
        1 => (1i64..10).prop_map(Op::AdvanceDays),
        1 => (0u64..100_000).prop_map(Op::Watch),
    ]
}

async fn run_sequence(ops: Vec<Op>) {
    let s = stack().await;
    s.directory.set_course_duration(s.course, 1_200);
    let mut last_version = 1;

    for (n, op) in ops.into_iter().enumerate() {
        // Refused operations are fine; every outcome must leave a valid record.
        let _ = match op {
            Op::Pay { payer, gross } => s.pay(payer, &format!("op-{n}"), gross).await.map(|_| ()),
            Op::Withdraw(tranche) => s
                .service
                .withdraw(&ctx("author"), &s.course, tranche, None)
                .await
                .map(|_| ()),
            Op::Dispute { payer } => s
                .service
                .file_dispute(&ctx(&learner(payer)), &s.course, "property test")
                .await
                .map(|_| ()),
            Op::Resolve(action) => s
                .service
                .resolve_dispute(&ctx("oracle"), &s.course, action)
                .await
                .map(|_| ()),
            Op::AdvanceDays(days) => {
                s.clock.advance_days(days);
                Ok(())
            }
            Op::Watch(secs) => {
                s.directory.set_watch_seconds(s.course, secs);
                Ok(())
            }
        };

        let head = s.ledger.fetch_current(&s.course).await.unwrap();
        assert!(head.version >= last_version, "ledger version went backwards");
        last_version = head.version;
        s.assert_consistent().await;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn random_sequences_keep_ledger_and_mirror_consistent(ops in prop::collection::vec(op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_sequence(ops));
    }
}

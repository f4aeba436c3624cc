//! # Refund Distribution
//!
//! A refunded pool is split among payers in proportion to the net deposits
//! the ledger committed for them, using the largest-remainder method:
//!
//! 1. Each payer gets `floor(pool * contribution / total)`.
//! 2. The units left over go one each to the payers with the largest
//!    fractional remainders; ties go to whoever paid first.
//!
//! Shares therefore always sum to exactly the pool. With no deposits the
//! whole pool is reported as undistributed.

use serde::Serialize;

use escrow_core::{Amount, UserId};
use escrow_ledger::{CommittedEntry, Deposit, PayerShare};

/// How a refunded pool is split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundPlan {
    pub shares: Vec<PayerShare>,
    /// Amount with no deposit to attribute it to; needs manual handling.
    pub undistributed: Amount,
}

impl RefundPlan {
    pub fn total(&self) -> u128 {
        self.shares.iter().map(|s| u128::from(s.amount)).sum::<u128>()
            + u128::from(self.undistributed)
    }
}

/// The deposits recorded by a line's entries, oldest first.
pub fn deposits_of(history: &[CommittedEntry]) -> Vec<Deposit> {
    history
        .iter()
        .filter_map(|entry| entry.instruction.deposit.clone())
        .collect()
}

/// Split `pool` over `deposits` (oldest first).
pub fn distribute_refund(pool: Amount, deposits: &[Deposit]) -> RefundPlan {
    // Aggregate per payer, keeping first-payment order.
    let mut contributions: Vec<(UserId, u128)> = Vec::new();
    for deposit in deposits {
        match contributions.iter_mut().find(|(payer, _)| *payer == deposit.payer) {
            Some((_, total)) => *total += u128::from(deposit.net_amount),
            None => contributions.push((deposit.payer.clone(), u128::from(deposit.net_amount))),
        }
    }

    let total: u128 = contributions.iter().map(|(_, c)| c).sum();
    if pool == 0 || total == 0 {
        return RefundPlan {
            shares: Vec::new(),
            undistributed: pool,
        };
    }

    let pool_wide = u128::from(pool);
    let mut base: Vec<u128> = Vec::with_capacity(contributions.len());
    let mut remainders: Vec<(usize, u128)> = Vec::with_capacity(contributions.len());
    for (i, (_, contribution)) in contributions.iter().enumerate() {
        let scaled = pool_wide * contribution;
        base.push(scaled / total);
        remainders.push((i, scaled % total));
    }

    let assigned: u128 = base.iter().sum();
    let leftover = pool_wide - assigned;
    // Stable sort keeps first-payment order among equal remainders.
    remainders.sort_by(|a, b| b.1.cmp(&a.1));
    for (i, _) in remainders.iter().take(leftover as usize) {
        base[*i] += 1;
    }

    let shares = contributions
        .into_iter()
        .zip(base)
        .filter(|(_, amount)| *amount > 0)
        // Each share is at most `pool`, so it fits in an Amount.
        .map(|((payer, _), amount)| PayerShare {
            payer,
            amount: amount as Amount,
        })
        .collect();

    RefundPlan {
        shares,
        undistributed: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_core::{AccountRecord, CourseId, IdentityHandle, Timestamp};
    use escrow_engine::TransitionKind;
    use escrow_ledger::{InstructionId, PayoutInstruction};
    use proptest::prelude::*;

    fn deposit(payer: &str, net: Amount) -> Deposit {
        Deposit {
            payer: UserId::new(payer).unwrap(),
            gross_amount: net,
            fee: 0,
            net_amount: net,
        }
    }

    fn entry(version: u64, kind: TransitionKind, deposit: Option<Deposit>) -> CommittedEntry {
        let course = CourseId::derive("rust-101").unwrap();
        let mut instruction = PayoutInstruction::no_payout(
            InstructionId::new(),
            kind,
            Timestamp::parse("2026-03-01T00:00:00Z").unwrap(),
        );
        instruction.deposit = deposit;
        CommittedEntry {
            course_id: course,
            line: 0,
            version,
            record: AccountRecord::open(
                course,
                IdentityHandle::new("payee").unwrap(),
                IdentityHandle::new("oracle").unwrap(),
            ),
            instruction,
        }
    }

    fn amounts(plan: &RefundPlan) -> Vec<(&str, Amount)> {
        plan.shares
            .iter()
            .map(|s| (s.payer.as_str(), s.amount))
            .collect()
    }

    #[test]
    fn equal_payers_split_evenly() {
        let deposits: Vec<_> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|p| deposit(p, 9_300_000))
            .collect();
        let plan = distribute_refund(32_550_000, &deposits);
        assert!(plan.shares.iter().all(|s| s.amount == 6_510_000));
        assert_eq!(plan.undistributed, 0);
    }

    #[test]
    fn ties_go_to_earliest_payer() {
        let deposits = vec![deposit("a", 1), deposit("b", 1), deposit("c", 1)];
        let plan = distribute_refund(10, &deposits);
        assert_eq!(amounts(&plan), vec![("a", 4), ("b", 3), ("c", 3)]);
    }

    #[test]
    fn largest_remainder_wins_leftover() {
        // a: 10 * 1/6 = 1.67, b: 10 * 2/6 = 3.33, c: 10 * 3/6 = 5.00
        let deposits = vec![deposit("a", 1), deposit("b", 2), deposit("c", 3)];
        let plan = distribute_refund(10, &deposits);
        assert_eq!(amounts(&plan), vec![("a", 2), ("b", 3), ("c", 5)]);
    }

    #[test]
    fn repeat_payers_are_aggregated() {
        let deposits = vec![deposit("a", 50), deposit("b", 100), deposit("a", 50)];
        let plan = distribute_refund(100, &deposits);
        assert_eq!(amounts(&plan), vec![("a", 50), ("b", 50)]);
    }

    #[test]
    fn deposits_come_from_payment_entries_only() {
        let history = vec![
            entry(1, TransitionKind::Open, None),
            entry(2, TransitionKind::AddPayment, Some(deposit("a", 70))),
            entry(3, TransitionKind::ReleaseInitial, None),
            entry(4, TransitionKind::AddPayment, Some(deposit("b", 30))),
        ];
        let deposits = deposits_of(&history);
        assert_eq!(deposits.len(), 2);
        let plan = distribute_refund(10, &deposits);
        assert_eq!(amounts(&plan), vec![("a", 7), ("b", 3)]);
    }

    #[test]
    fn no_deposits_leaves_pool_undistributed() {
        let plan = distribute_refund(500, &[]);
        assert!(plan.shares.is_empty());
        assert_eq!(plan.undistributed, 500);
    }

    #[test]
    fn empty_pool_pays_nothing() {
        let plan = distribute_refund(0, &[deposit("a", 10)]);
        assert!(plan.shares.is_empty());
        assert_eq!(plan.undistributed, 0);
    }

    proptest! {
        #[test]
        fn shares_sum_to_pool(
            pool in 0u64..1_000_000_000_000,
            nets in proptest::collection::vec(1u64..10_000_000_000, 0..12)
        ) {
            let deposits: Vec<_> = nets
                .iter()
                .enumerate()
                .map(|(i, n)| deposit(&format!("payer-{}", i % 5), *n))
                .collect();
            let plan = distribute_refund(pool, &deposits);
            prop_assert_eq!(plan.total(), u128::from(pool));
        }
    }
}

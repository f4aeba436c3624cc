//! # Amounts and Settlement Constants
//!
//! All money is `u64` in the smallest currency unit. There is no
//! floating-point arithmetic anywhere in the settlement path: fractional
//! releases are computed as `floor(amount * numerator / denominator)`
//! through a `u128` intermediate, so `amount * 100` can never overflow.

/// Amount in the smallest currency unit.
pub type Amount = u64;

/// Basis-point denominator (10000 bps = 100%).
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Platform fee withheld from each gross deposit (7%).
pub const PLATFORM_FEE_BPS: u64 = 700;

/// Number of payments that unlocks the enrollment tranche.
pub const TRANCHE30_MIN_PAYMENTS: u64 = 5;

/// Enrollment tranche share, in percent.
pub const TRANCHE30_PERCENT: u64 = 30;

/// Engagement tranche share of the remaining locked pool, in percent.
pub const TRANCHE40_PERCENT: u64 = 40;

/// Minimum average watch ratio for the engagement tranche (60%).
pub const MIN_WATCH_BPS: u32 = 6_000;

/// Length of the dispute window after the first watch event.
pub const DISPUTE_WINDOW_DAYS: i64 = 14;

/// Ratings are recorded in tenths of a star, 0..=50.
pub const MAX_RATING_TENTHS: u32 = 50;

/// `floor(amount * pct / 100)`.
///
/// `pct` above 100 is clamped so the result never exceeds `amount`.
pub fn percent_of(amount: Amount, pct: u64) -> Amount {
    let pct = pct.min(100);
    // amount * pct / 100 <= amount, so the narrowing cannot truncate.
    ((amount as u128 * pct as u128) / 100) as Amount
}

/// `floor(amount * bps / 10000)`.
///
/// `bps` above 10000 is clamped so the result never exceeds `amount`.
pub fn bps_of(amount: Amount, bps: u64) -> Amount {
    let bps = bps.min(BPS_DENOMINATOR);
    ((amount as u128 * bps as u128) / BPS_DENOMINATOR as u128) as Amount
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn percent_floors() {
        assert_eq!(percent_of(46_500_000, 30), 13_950_000);
        assert_eq!(percent_of(32_550_000, 40), 13_020_000);
        assert_eq!(percent_of(9, 30), 2);
        assert_eq!(percent_of(0, 30), 0);
    }

    #[test]
    fn percent_does_not_overflow() {
        assert_eq!(percent_of(u64::MAX, 100), u64::MAX);
        assert_eq!(percent_of(u64::MAX, 30), ((u64::MAX as u128 * 30) / 100) as u64);
    }

    #[test]
    fn percent_clamps() {
        assert_eq!(percent_of(1_000, 250), 1_000);
    }

    #[test]
    fn platform_fee_matches_reference_deposit() {
        let gross = 10_000_000;
        let fee = bps_of(gross, PLATFORM_FEE_BPS);
        assert_eq!(fee, 700_000);
        assert_eq!(gross - fee, 9_300_000);
    }

    proptest! {
        #[test]
        fn percent_never_exceeds_amount(amount in any::<u64>(), pct in 0u64..=100) {
            prop_assert!(percent_of(amount, pct) <= amount);
        }

        #[test]
        fn bps_never_exceeds_amount(amount in any::<u64>(), bps in 0u64..=10_000) {
            prop_assert!(bps_of(amount, bps) <= amount);
        }
    }
}

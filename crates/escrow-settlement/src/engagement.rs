//! Engagement aggregation for the 40% tranche.

use serde::Serialize;

use escrow_core::{AccountRecord, CourseId, BPS_DENOMINATOR, MIN_WATCH_BPS};
use escrow_engine::Engagement;
use escrow_ledger::Version;

/// Average watch ratio in basis points:
/// `watch_secs * 10000 / (duration_secs * paid_count)`, capped at 10000.
///
/// Zero when the course has no duration or no payments yet.
pub fn average_watch_bps(watch_secs: u64, duration_secs: u64, paid_count: u64) -> u32 {
    let denominator = u128::from(duration_secs) * u128::from(paid_count);
    if denominator == 0 {
        return 0;
    }
    let bps = u128::from(watch_secs) * u128::from(BPS_DENOMINATOR) / denominator;
    // Capped at 10000, so the narrowing is lossless.
    bps.min(u128::from(BPS_DENOMINATOR)) as u32
}

/// Read-only eligibility report returned by `evaluate_engagement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngagementReport {
    pub course_id: CourseId,
    /// Ledger version of the record the counters were read from.
    pub source_version: Version,
    pub aggregated_watch_seconds: u64,
    pub course_duration_seconds: u64,
    pub paid_count: u64,
    pub avg_watch_bps: u32,
    pub rating_count: u64,
    pub comment_count: u64,
    pub average_rating_tenths: Option<u64>,
    pub has_rating_and_comment: bool,
    /// Whether the engagement criteria hold. Tranche preconditions are not
    /// part of this check.
    pub eligible: bool,
}

impl EngagementReport {
    pub fn build(
        record: &AccountRecord,
        source_version: Version,
        watch_secs: u64,
        duration_secs: u64,
    ) -> Self {
        let engagement = engagement_for(record, watch_secs, duration_secs);
        Self {
            course_id: record.course_id,
            source_version,
            aggregated_watch_seconds: watch_secs,
            course_duration_seconds: duration_secs,
            paid_count: record.paid_count,
            avg_watch_bps: engagement.avg_watch_bps,
            rating_count: record.rating_count,
            comment_count: record.comment_count,
            average_rating_tenths: record.average_rating_tenths(),
            has_rating_and_comment: engagement.has_rating_and_comment,
            eligible: engagement.avg_watch_bps >= MIN_WATCH_BPS
                && engagement.has_rating_and_comment,
        }
    }
}

/// Engine input for the 40% tranche, from a record and watch totals.
pub(crate) fn engagement_for(record: &AccountRecord, watch_secs: u64, duration_secs: u64) -> Engagement {
    Engagement {
        avg_watch_bps: average_watch_bps(watch_secs, duration_secs, record.paid_count),
        has_rating_and_comment: record.has_rating_and_comment(),
    }
}

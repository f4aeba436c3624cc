//! Clock port.
//!
//! Dispute windows and deadlines are evaluated against [`Clock::now`], so
//! tests can move time without sleeping.

use std::sync::Arc;

use escrow_core::Timestamp;
use parking_lot::RwLock;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<Timestamp>>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    pub fn set(&self, now: Timestamp) {
        *self.now.write() = now;
    }

    /// Move forward by `secs`. Out-of-range results leave the clock unchanged.
    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.write();
        if let Some(next) = now.checked_add_secs(secs) {
            *now = next;
        }
    }

    pub fn advance_days(&self, days: i64) {
        let mut now = self.now.write();
        if let Some(next) = now.checked_add_days(days) {
            *now = next;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.read()
    }
}

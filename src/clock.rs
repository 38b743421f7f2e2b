//! Time source and investment-period arithmetic.
//!
//! "Now" always comes from the venue's server time so that a skewed local
//! clock cannot shift investment rounds. Period boundaries are
//! `origin + i * period` and are re-derived from live time on every use,
//! never accumulated.

use std::sync::Arc;

use crate::exchange::{Exchange, ExchangeError};

/// Reads the current time from the venue.
#[derive(Clone)]
pub struct Clock {
    exchange: Arc<dyn Exchange>,
}

impl Clock {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self { exchange }
    }

    /// Current venue time in ms since epoch.
    pub async fn now_ms(&self) -> Result<i64, ExchangeError> {
        self.exchange.server_time_ms().await
    }
}

/// Fixed-length calendar anchored at an origin timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodCalendar {
    origin_ms: i64,
    period_ms: i64,
}

impl PeriodCalendar {
    /// `period_ms` must be positive; the config layer guarantees it.
    pub fn new(origin_ms: i64, period_ms: i64) -> Self {
        debug_assert!(period_ms > 0, "period must be positive");
        Self {
            origin_ms,
            period_ms: period_ms.max(1),
        }
    }

    pub fn period_ms(&self) -> i64 {
        self.period_ms
    }

    /// Index of the period containing `now_ms` (floored, also before origin).
    pub fn period_index(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.origin_ms).div_euclid(self.period_ms)
    }

    /// Start of period `index`, saturating at the ends of the timeline.
    pub fn boundary(&self, index: i64) -> i64 {
        self.origin_ms.saturating_add(index.saturating_mul(self.period_ms))
    }

    /// First boundary strictly after `now_ms`.
    ///
    /// However long the caller stalled, this lands on the single next
    /// boundary, so missed periods collapse into one round.
    pub fn next_deadline(&self, now_ms: i64) -> i64 {
        self.boundary(self.period_index(now_ms).saturating_add(1))
    }

    /// Whether `ts_ms` lies exactly on a period boundary.
    pub fn is_boundary(&self, ts_ms: i64) -> bool {
        ts_ms.saturating_sub(self.origin_ms).rem_euclid(self.period_ms) == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

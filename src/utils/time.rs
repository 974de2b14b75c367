use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// Source of "now" for deadline arithmetic. The deadline itself always comes
/// from the server; only the comparison point is local.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock anchored once to `Utc::now()` and advanced by the tokio
/// monotonic clock, so a local clock change mid-exam does not move the
/// countdown (and paused-time tests see time advance).
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    anchor_utc: DateTime<Utc>,
    anchor_instant: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    pub fn anchored_at(anchor_utc: DateTime<Utc>) -> Self {
        Self {
            anchor_utc,
            anchor_instant: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.anchor_instant.elapsed();
        self.anchor_utc + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

pub fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Time left until `deadline`, saturating at zero.
pub fn remaining_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

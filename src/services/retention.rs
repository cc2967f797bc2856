//! Trash retention window arithmetic.
//!
//! Pure functions of a deletion timestamp and the configured retention; no I/O.

use chrono::{DateTime, TimeDelta, Utc};

pub const DEFAULT_RETENTION_DAYS: u32 = 30;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    retention: TimeDelta,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_days(DEFAULT_RETENTION_DAYS)
    }
}

impl RetentionPolicy {
    pub fn new(retention: TimeDelta) -> Self {
        Self { retention }
    }

    pub fn from_days(days: u32) -> Self {
        Self::new(TimeDelta::days(i64::from(days)))
    }

    pub fn retention(&self) -> TimeDelta {
        self.retention
    }

    pub fn expiry_of(&self, deleted_at: DateTime<Utc>) -> DateTime<Utc> {
        deleted_at + self.retention
    }

    /// Whole days left before `expires_at`, rounded up and never negative.
    ///
    /// Anything with time left reports at least 1; 0 means eligible for sweeping.
    pub fn days_remaining(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        let left = (expires_at - now).num_milliseconds();
        if left <= 0 {
            0
        } else {
            (left + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
        }
    }

    /// Strictly past the window; the exact boundary instant is not yet expired.
    pub fn is_expired(&self, deleted_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - deleted_at > self.retention
    }

    /// Days the window spans, rounded up.
    pub fn retention_days(&self) -> i64 {
        let millis = self.retention.num_milliseconds().max(0);
        (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
    }

    pub fn retention_message(&self) -> String {
        format!(
            "File moved to trash. Will be permanently deleted after {} days.",
            self.retention_days()
        )
    }
}

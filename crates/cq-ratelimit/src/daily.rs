//! Per-key daily counter on a fixed Asia/Taipei calendar day.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// Taiwan has used UTC+8 without daylight saving since 1980.
const TAIPEI_OFFSET_SECS: i32 = 8 * 3600;

/// Asia/Taipei as a fixed offset.
pub fn taipei() -> FixedOffset {
    FixedOffset::east_opt(TAIPEI_OFFSET_SECS).expect("UTC+8 is a valid offset")
}

/// Calendar date of `now` in Asia/Taipei.
pub fn taipei_date(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&taipei()).date_naive()
}

/// Counts uses within the current local day.
#[derive(Debug, Clone)]
pub struct DailyCounter {
    limit: u32,
    used: u32,
    day: NaiveDate,
}

impl DailyCounter {
    pub fn new(limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            limit,
            used: 0,
            day: taipei_date(now),
        }
    }

    /// Reset the counter once `now` falls on a later local day than the
    /// stored window.
    pub fn roll(&mut self, now: DateTime<Utc>) {
        let today = taipei_date(now);
        if today > self.day {
            self.day = today;
            self.used = 0;
        }
    }

    pub fn has_quota(&self) -> bool {
        self.used < self.limit
    }

    pub fn consume(&mut self) {
        self.used = self.used.saturating_add(1).min(self.limit);
    }

    pub fn remaining(&self) -> u32 {
        self.limit - self.used
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    /// True when the stored window is an earlier day than `now`'s.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        taipei_date(now) > self.day
    }
}

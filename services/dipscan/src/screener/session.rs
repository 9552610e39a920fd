//! Market-local session windows.
//!
//! # A-Share Market Hours (Beijing Time)
//!
//! - 09:15-09:25: Pre-market auction
//! - 09:30-11:30: Morning session
//! - 13:00-15:00: Afternoon session
//!
//! The screener only cares about the opening window, 09:30-11:00 on weekdays.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};

/// Market time zone helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketCalendar {
    offset: FixedOffset,
}

impl MarketCalendar {
    /// Beijing time (UTC+8).
    pub fn beijing() -> Self {
        Self {
            offset: FixedOffset::east_opt(8 * 3600).expect("UTC+8 is a valid timezone offset"),
        }
    }

    /// Calendar at a whole-hour offset from UTC. `None` if out of range.
    pub fn with_utc_offset_hours(hours: i32) -> Option<Self> {
        FixedOffset::east_opt(hours * 3600).map(|offset| Self { offset })
    }

    /// Convert a UTC instant to market local time.
    pub fn local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset)
    }

    /// Monday through Friday in market local time. Holidays are not modelled.
    pub fn is_trading_day(&self, now: DateTime<Utc>) -> bool {
        !matches!(self.local(now).weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Whether `now` falls in `[09:30, 11:00)` on a trading day.
    pub fn in_opening_window(&self, now: DateTime<Utc>) -> bool {
        let local = self.local(now);
        let (hour, minute) = (local.hour(), local.minute());

        self.is_trading_day(now) && ((hour == 9 && minute >= 30) || hour == 10)
    }
}

impl Default for MarketCalendar {
    fn default() -> Self {
        Self::beijing()
    }
}

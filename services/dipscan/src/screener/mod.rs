//! Dip screener.
//!
//! Keeps instruments whose previous session was negative (and therefore not
//! limit-up) and which, during the opening window, opened above the previous
//! close.
//!
//! Multi-day conditions (consecutive limit-ups, the change two sessions ago)
//! need history the quote line does not carry and are not evaluated.

mod session;

pub use session::MarketCalendar;

use chrono::{DateTime, Utc};

use crate::data::QuoteRecord;

/// Practical limit-up ceiling, just under the nominal 10% cap.
pub const LIMIT_UP_THRESHOLD_PCT: f64 = 9.9;

/// The screening predicate, bound to a market calendar.
#[derive(Debug, Clone, Copy, Default)]
pub struct DipScreener {
    calendar: MarketCalendar,
}

impl DipScreener {
    pub fn new(calendar: MarketCalendar) -> Self {
        Self { calendar }
    }

    pub fn calendar(&self) -> &MarketCalendar {
        &self.calendar
    }

    /// Evaluate one record at `now`.
    ///
    /// A record whose previous-day change is undefined never matches.
    pub fn matches(&self, record: &QuoteRecord, now: DateTime<Utc>) -> bool {
        let Some(previous_day_change) = record.previous_day_change() else {
            return false;
        };

        let not_limit_up = previous_day_change < LIMIT_UP_THRESHOLD_PCT;
        let previous_day_negative = previous_day_change < 0.0;
        let opened_higher = record.open_price() > record.previous_close();

        not_limit_up
            && previous_day_negative
            && (!self.calendar.in_opening_window(now) || opened_higher)
    }

    /// Keep the matching records, in input order.
    pub fn filter(&self, records: Vec<QuoteRecord>, now: DateTime<Utc>) -> Vec<QuoteRecord> {
        records
            .into_iter()
            .filter(|r| self.matches(r, now))
            .collect()
    }
}

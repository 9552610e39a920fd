//! Market data module for the screener.
//!
//! Fetches a batch of quotes, decodes the Sina wire format, derives the
//! percentage metrics and keeps the filtered batch in a TTL cache.
//!
//! # Data Sources
//! - **sina** (default): `hq.sinajs.cn` real-time quote lines
//! - **mock**: synthetic batches in the same wire format, for offline use

mod cache;
pub mod metrics;
mod mock;
mod provider;
pub mod sina;

pub use cache::{CacheEntry, CacheStatus, QuoteCache};
pub use mock::MockQuoteSource;
pub use provider::QuoteSource;
pub use sina::SinaQuoteSource;

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by a refresh of the quote pipeline.
///
/// `Clone` so that one failed in-flight refresh can be handed to every
/// caller awaiting it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuoteError {
    /// Connection failed or the server answered with a non-success status
    #[error("Network error: {0}")]
    Network(String),

    /// The quote service did not answer within the configured timeout
    #[error("Quote request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The response did not match the expected wire shape
    #[error("Parse error on line {line}{}: {reason}", code_suffix(.code))]
    Parse {
        code: Option<String>,
        line: usize,
        reason: String,
    },

    /// The source cannot serve requests at all
    #[error("Quote source unavailable: {0}")]
    Unavailable(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_ref().map(|c| format!(" ({c})")).unwrap_or_default()
}

impl QuoteError {
    /// Build a parse error for a line whose code is known.
    pub fn parse(code: impl Into<String>, line: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            code: Some(code.into()),
            line,
            reason: reason.into(),
        }
    }

    /// Check if the next scheduled attempt may plausibly succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout { .. })
    }
}

// ============================================================================
// Core Data Types
// ============================================================================

/// Positional fields decoded from one quote line, before any derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawQuote {
    /// Instrument code, e.g. "sh000001"
    pub code: String,
    /// Display name
    pub name: String,
    /// Today's open
    pub open_price: f64,
    /// Previous session close
    pub previous_close: f64,
    /// Latest price
    pub price: f64,
    /// Intraday high
    pub high_price: f64,
    /// Intraday low
    pub low_price: f64,
    /// Traded value
    pub turnover: f64,
}

/// A fully derived quote as served to the display surface.
///
/// Derived percentages are computed once from the raw fields in
/// [`QuoteRecord::from_raw`] and cannot be set independently. `None` marks a
/// metric that is undefined because its divisor was zero; it serializes as
/// `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRecord {
    code: String,
    name: String,
    price: f64,
    change: Option<f64>,
    previous_close: f64,
    open_price: f64,
    previous_day_change: Option<f64>,
    // Historical and share-capital data is not available from the quote line.
    two_days_ago_change: f64,
    consecutive_limit_ups: u32,
    turnover_rate: f64,
    high_price: f64,
    low_price: f64,
    amplitude: Option<f64>,
    turnover: f64,
    market_cap: f64,
}

impl QuoteRecord {
    /// Derive a record from parsed positional fields.
    pub fn from_raw(raw: RawQuote) -> Self {
        let change = metrics::change_pct(raw.price, raw.previous_close);
        let previous_day_change =
            metrics::previous_day_change_pct(raw.previous_close, raw.open_price);
        let amplitude = metrics::amplitude_pct(raw.high_price, raw.low_price, raw.previous_close);

        Self {
            code: raw.code,
            name: raw.name,
            price: raw.price,
            change,
            previous_close: raw.previous_close,
            open_price: raw.open_price,
            previous_day_change,
            two_days_ago_change: 0.0,
            consecutive_limit_ups: 0,
            turnover_rate: 0.0,
            high_price: raw.high_price,
            low_price: raw.low_price,
            amplitude,
            turnover: raw.turnover,
            market_cap: 0.0,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    /// Percent change of the latest price against the previous close.
    pub fn change(&self) -> Option<f64> {
        self.change
    }

    pub fn previous_close(&self) -> f64 {
        self.previous_close
    }

    pub fn open_price(&self) -> f64 {
        self.open_price
    }

    /// Percent change of the previous close against today's open.
    pub fn previous_day_change(&self) -> Option<f64> {
        self.previous_day_change
    }

    pub fn two_days_ago_change(&self) -> f64 {
        self.two_days_ago_change
    }

    pub fn consecutive_limit_ups(&self) -> u32 {
        self.consecutive_limit_ups
    }

    pub fn turnover_rate(&self) -> f64 {
        self.turnover_rate
    }

    pub fn high_price(&self) -> f64 {
        self.high_price
    }

    pub fn low_price(&self) -> f64 {
        self.low_price
    }

    /// Intraday range relative to the previous close, in percent.
    pub fn amplitude(&self) -> Option<f64> {
        self.amplitude
    }

    pub fn turnover(&self) -> f64 {
        self.turnover
    }

    pub fn market_cap(&self) -> f64 {
        self.market_cap
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn raw(code: &str, open: f64, prev_close: f64, price: f64) -> RawQuote {
        RawQuote {
            code: code.to_string(),
            name: format!("name-{code}"),
            open_price: open,
            previous_close: prev_close,
            price,
            high_price: open.max(prev_close).max(price),
            low_price: open.min(prev_close).min(price),
            turnover: 123_456_789.0,
        }
    }

    #[test]
    fn test_from_raw_derives_metrics() {
        let record = QuoteRecord::from_raw(RawQuote {
            code: "sh000001".into(),
            name: "指数A".into(),
            open_price: 100.0,
            previous_close: 99.0,
            price: 98.5,
            high_price: 101.0,
            low_price: 97.0,
            turnover: 123_456_789.0,
        });

        assert!((record.previous_day_change().unwrap() - -1.0).abs() < 1e-9);
        assert!((record.change().unwrap() - -0.505_050_505).abs() < 1e-6);
        assert!((record.amplitude().unwrap() - 4.040_404_04).abs() < 1e-6);
        assert_eq!(record.turnover_rate(), 0.0);
        assert_eq!(record.market_cap(), 0.0);
        assert_eq!(record.consecutive_limit_ups(), 0);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = QuoteRecord::from_raw(raw("sz399001", 10.0, 9.0, 9.5));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["code"], "sz399001");
        assert!(json.get("previousDayChange").is_some());
        assert!(json.get("previousClose").is_some());
        assert!(json.get("consecutiveLimitUps").is_some());
        assert_eq!(json["twoDaysAgoChange"], 0.0);
    }

    #[test]
    fn test_undefined_metric_serializes_null() {
        let record = QuoteRecord::from_raw(raw("sh600000", 0.0, 9.0, 9.5));
        let json = serde_json::to_value(&record).unwrap();
        assert!(json["previousDayChange"].is_null());
        assert!(json["change"].is_number());
    }

    #[test]
    fn test_parse_error_display() {
        let err = QuoteError::parse("sh000001", 3, "expected at least 17 fields, got 5");
        assert_eq!(
            err.to_string(),
            "Parse error on line 3 (sh000001): expected at least 17 fields, got 5"
        );

        let err = QuoteError::Parse {
            code: None,
            line: 1,
            reason: "missing hq_str_ prefix".into(),
        };
        assert_eq!(err.to_string(), "Parse error on line 1: missing hq_str_ prefix");
    }

    #[test]
    fn test_recoverable() {
        assert!(QuoteError::Network("refused".into()).is_recoverable());
        assert!(QuoteError::Timeout { secs: 10 }.is_recoverable());
        assert!(!QuoteError::parse("x", 1, "bad").is_recoverable());
        assert!(!QuoteError::Unavailable("off".into()).is_recoverable());
    }
}

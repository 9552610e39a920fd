//! Sina real-time quote adapter.
//!
//! Fetches `hq.sinajs.cn` batches and decodes them. One line per instrument:
//!
//! ```text
//! var hq_str_sh000001="上证指数,3089.2583,3086.4101,3095.8930,3097.4580,3078.6940,0,0,...";
//! ```
//!
//! Only a fixed positional subset of the comma-separated payload is used, see
//! [`Field`]. The decoder is strict: any malformed line fails the whole batch.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use dipscan_common::config::QuotesConfig;

use super::provider::QuoteSource;
use super::{QuoteError, RawQuote};

// ============================================================================
// Wire Schema
// ============================================================================

/// Matches the instrument code in `hq_str_<code>=`.
static CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"hq_str_(\w+)=").expect("code pattern is a valid regex"));

/// Positions of the payload fields this service reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Open,
    PreviousClose,
    Price,
    High,
    Low,
    Turnover,
}

impl Field {
    /// Zero-based position in the comma-separated payload.
    pub const fn index(self) -> usize {
        match self {
            Self::Name => 0,
            Self::Open => 1,
            Self::PreviousClose => 2,
            Self::Price => 3,
            Self::High => 4,
            Self::Low => 5,
            Self::Turnover => 16,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Open => "open",
            Self::PreviousClose => "previous close",
            Self::Price => "price",
            Self::High => "high",
            Self::Low => "low",
            Self::Turnover => "turnover",
        }
    }
}

/// A payload must reach the highest position we read.
pub const MIN_FIELDS: usize = Field::Turnover.index() + 1;

/// Split payload of one line, addressed by [`Field`].
struct Payload<'a> {
    code: &'a str,
    line: usize,
    fields: Vec<&'a str>,
}

impl<'a> Payload<'a> {
    fn new(code: &'a str, line: usize, body: &'a str) -> Result<Self, QuoteError> {
        let fields: Vec<&str> = body.split(',').collect();
        if fields.len() < MIN_FIELDS {
            return Err(QuoteError::parse(
                code,
                line,
                format!("expected at least {} fields, got {}", MIN_FIELDS, fields.len()),
            ));
        }
        Ok(Self { code, line, fields })
    }

    fn text(&self, field: Field) -> &'a str {
        self.fields[field.index()].trim()
    }

    fn amount(&self, field: Field) -> Result<f64, QuoteError> {
        let raw = self.text(field);
        let value = raw.parse::<f64>().map_err(|_| {
            QuoteError::parse(
                self.code,
                self.line,
                format!("{} '{}' is not a number", field.label(), raw),
            )
        })?;

        if !value.is_finite() || value < 0.0 {
            return Err(QuoteError::parse(
                self.code,
                self.line,
                format!("{} '{}' is not a finite non-negative amount", field.label(), raw),
            ));
        }

        Ok(value)
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Decode one non-blank line. `line` is its 1-based position among non-blank lines.
fn parse_line(text: &str, line: usize) -> Result<RawQuote, QuoteError> {
    let captures = CODE_PATTERN.captures(text).ok_or_else(|| QuoteError::Parse {
        code: None,
        line,
        reason: "line does not match hq_str_<code>=".into(),
    })?;
    let whole = captures.get(0).map_or(0, |m| m.end());
    let code = captures.get(1).map_or("", |m| m.as_str());

    let rest = text[whole..]
        .strip_prefix('"')
        .ok_or_else(|| QuoteError::parse(code, line, "missing quoted payload"))?;
    let body = match rest.find('"') {
        Some(end) => &rest[..end],
        None => return Err(QuoteError::parse(code, line, "unterminated payload")),
    };

    let payload = Payload::new(code, line, body)?;
    let quote = RawQuote {
        code: code.to_string(),
        name: payload.text(Field::Name).to_string(),
        open_price: payload.amount(Field::Open)?,
        previous_close: payload.amount(Field::PreviousClose)?,
        price: payload.amount(Field::Price)?,
        high_price: payload.amount(Field::High)?,
        low_price: payload.amount(Field::Low)?,
        turnover: payload.amount(Field::Turnover)?,
    };

    if quote.high_price < quote.low_price {
        return Err(QuoteError::parse(
            code,
            line,
            format!("high {} is below low {}", quote.high_price, quote.low_price),
        ));
    }

    Ok(quote)
}

/// Decode a full response into quotes, preserving wire order.
///
/// Blank lines are skipped. The first malformed line, or a code that appears
/// twice, fails the whole batch.
pub fn parse_batch(text: &str) -> Result<Vec<RawQuote>, QuoteError> {
    let mut seen = HashSet::new();
    let mut quotes = Vec::new();

    for (idx, line) in text
        .split('\n')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
    {
        let quote = parse_line(line, idx + 1)?;
        if !seen.insert(quote.code.clone()) {
            return Err(QuoteError::parse(quote.code, idx + 1, "duplicate code in batch"));
        }
        quotes.push(quote);
    }

    Ok(quotes)
}

// ============================================================================
// Sina Adapter
// ============================================================================

/// HTTP source for `hq.sinajs.cn`.
pub struct SinaQuoteSource {
    /// HTTP client
    client: reqwest::Client,
    /// Endpoint prefix the joined codes are appended to
    endpoint: String,
    /// Referer header value; requests without it are refused upstream
    referer: String,
    /// Request timeout, reported in timeout errors
    timeout: Duration,
}

impl SinaQuoteSource {
    /// Create a new Sina source.
    pub fn new(endpoint: impl Into<String>, referer: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoint: endpoint.into(),
            referer: referer.into(),
            timeout,
        }
    }

    /// Create from config
    pub fn from_config(config: &QuotesConfig) -> Self {
        Self::new(
            config.endpoint.clone(),
            config.referer.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// URL for one batch request.
    pub fn batch_url(&self, codes: &[String]) -> String {
        format!("{}{}", self.endpoint, codes.join(","))
    }

    fn map_reqwest_error(&self, e: reqwest::Error) -> QuoteError {
        if e.is_timeout() {
            QuoteError::Timeout {
                secs: self.timeout.as_secs(),
            }
        } else {
            QuoteError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl QuoteSource for SinaQuoteSource {
    fn name(&self) -> &'static str {
        "sina"
    }

    async fn fetch_raw(&self, codes: &[String]) -> Result<String, QuoteError> {
        let url = self.batch_url(codes);
        debug!(url = %url, count = codes.len(), "Fetching quotes from sina");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::REFERER, &self.referer)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(QuoteError::Network(format!("HTTP {}", status)));
        }

        response.text().await.map_err(|e| self.map_reqwest_error(e))
    }
}

// ============================================================================
// Tests
// ============================================================================

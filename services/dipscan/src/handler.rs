//! Request boundary between the display surface and the quote cache.
//!
//! Every outcome is a [`GetStocksResponse`]; failures become an `error`
//! payload instead of propagating to the transport.

use serde::{Deserialize, Serialize};
use tracing::{info_span, warn, Instrument};

use dipscan_common::logging::generate_request_id;

use crate::data::{QuoteCache, QuoteError, QuoteRecord};

/// Inbound message from the display surface.
///
/// ```json
/// { "action": "getStocks", "maxStocks": 10 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action")]
pub enum Request {
    #[serde(rename = "getStocks")]
    GetStocks {
        #[serde(rename = "maxStocks")]
        max_stocks: usize,
    },
}

/// Response to a `getStocks` request: `{ "stocks": [...] }` or `{ "error": "..." }`.
///
/// An empty `stocks` list means nothing matched; it is not a failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GetStocksResponse {
    Stocks { stocks: Vec<QuoteRecord> },
    Error { error: String },
}

impl GetStocksResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The records, if this is a success.
    pub fn stocks(&self) -> Option<&[QuoteRecord]> {
        match self {
            Self::Stocks { stocks } => Some(stocks),
            Self::Error { .. } => None,
        }
    }
}

impl From<Result<Vec<QuoteRecord>, QuoteError>> for GetStocksResponse {
    fn from(result: Result<Vec<QuoteRecord>, QuoteError>) -> Self {
        match result {
            Ok(stocks) => Self::Stocks { stocks },
            Err(e) => Self::error(e.to_string()),
        }
    }
}

/// Serves `getStocks` requests from the quote cache.
#[derive(Clone)]
pub struct RequestHandler {
    cache: QuoteCache,
}

impl RequestHandler {
    pub fn new(cache: QuoteCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &QuoteCache {
        &self.cache
    }

    /// Up to `max_stocks` screened records, cached or freshly fetched.
    pub async fn get_stocks(&self, max_stocks: usize) -> GetStocksResponse {
        let span = info_span!("get_stocks", request_id = %generate_request_id(), max_stocks);
        let response: GetStocksResponse = self.cache.get(max_stocks).instrument(span).await.into();
        if let GetStocksResponse::Error { error } = &response {
            warn!(error = %error, "getStocks failed");
        }
        response
    }

    /// Like [`get_stocks`](Self::get_stocks) but refetches first.
    pub async fn refresh_stocks(&self, max_stocks: usize) -> GetStocksResponse {
        let span = info_span!("refresh_stocks", request_id = %generate_request_id(), max_stocks);
        let response: GetStocksResponse =
            self.cache.refresh(max_stocks).instrument(span).await.into();
        if let GetStocksResponse::Error { error } = &response {
            warn!(error = %error, "Forced refresh failed");
        }
        response
    }

    /// Dispatch a decoded request.
    pub async fn handle(&self, request: Request) -> GetStocksResponse {
        match request {
            Request::GetStocks { max_stocks } => self.get_stocks(max_stocks).await,
        }
    }

    /// Decode and dispatch a raw message. Malformed messages become an error payload.
    pub async fn handle_message(&self, message: serde_json::Value) -> GetStocksResponse {
        match serde_json::from_value::<Request>(message) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(error = %e, "Rejected malformed request");
                GetStocksResponse::error(format!("Invalid request: {}", e))
            }
        }
    }
}

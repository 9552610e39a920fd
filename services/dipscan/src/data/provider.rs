//! Quote source abstraction.
//!
//! A source turns a list of instrument codes into the raw Sina-format
//! response text. Decoding happens in one place ([`super::sina::parse_batch`])
//! regardless of where the text came from.

use async_trait::async_trait;

use super::QuoteError;

/// Trait for raw quote sources.
///
/// Implementations perform a single attempt per call; retries are the
/// caller's concern.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Get the source name (e.g., "sina", "mock")
    fn name(&self) -> &'static str;

    /// Fetch the raw response text for a batch of codes.
    ///
    /// # Arguments
    /// * `codes` - Instrument codes (e.g., "sh000001"), in request order
    async fn fetch_raw(&self, codes: &[String]) -> Result<String, QuoteError>;
}

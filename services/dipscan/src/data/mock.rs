//! Synthetic quote source for offline runs and demos.
//!
//! Produces Sina-format lines with random prices so the rest of the pipeline
//! (decoder, metrics, screener, cache) runs unchanged.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

use super::provider::QuoteSource;
use super::sina::{Field, MIN_FIELDS};
use super::QuoteError;

/// Total fields per synthetic line, matching what Sina sends for an index.
const LINE_FIELDS: usize = 32;

/// Mock quote source.
pub struct MockQuoteSource {
    rng: Mutex<StdRng>,
}

impl MockQuoteSource {
    /// Create a source seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a deterministic source.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn render_line(rng: &mut StdRng, index: usize, code: &str) -> String {
        let base_price: f64 = rng.gen_range(100.0..1000.0);
        let change_pct: f64 = rng.gen_range(-5.0..5.0);
        let previous_close = base_price / (1.0 + change_pct / 100.0);
        let open = base_price * (1.0 + rng.gen_range(-0.01..0.01));
        let high = base_price * (1.0 + rng.gen_range(0.0..0.05));
        let low = base_price * (1.0 - rng.gen_range(0.0..0.05));
        let turnover: f64 = rng.gen_range(0.0..1_000_000_000.0);

        let mut fields = vec!["0".to_string(); LINE_FIELDS.max(MIN_FIELDS)];
        fields[Field::Name.index()] = format!("股票{}", index + 1);
        fields[Field::Open.index()] = format!("{:.2}", open);
        fields[Field::PreviousClose.index()] = format!("{:.2}", previous_close);
        fields[Field::Price.index()] = format!("{:.2}", base_price);
        fields[Field::High.index()] = format!("{:.2}", high);
        fields[Field::Low.index()] = format!("{:.2}", low);
        fields[Field::Turnover.index()] = format!("{:.0}", turnover);

        format!("var hq_str_{}=\"{}\";", code, fields.join(","))
    }
}

impl Default for MockQuoteSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteSource for MockQuoteSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn fetch_raw(&self, codes: &[String]) -> Result<String, QuoteError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| QuoteError::Unavailable("mock generator poisoned".into()))?;

        let lines: Vec<String> = codes
            .iter()
            .enumerate()
            .map(|(i, code)| Self::render_line(&mut rng, i, code))
            .collect();

        Ok(lines.join("\n"))
    }
}

//! Derived quote metrics.
//!
//! All values are percentages. A zero divisor makes the metric undefined
//! (`None`) instead of leaking `inf`/`NaN` into the screener.

/// `delta` as a percentage of `base`, `None` when `base` is zero.
fn pct_of(delta: f64, base: f64) -> Option<f64> {
    if base == 0.0 {
        return None;
    }
    let pct = delta / base * 100.0;
    pct.is_finite().then_some(pct)
}

/// `(price - previous_close) / previous_close * 100`
pub fn change_pct(price: f64, previous_close: f64) -> Option<f64> {
    pct_of(price - previous_close, previous_close)
}

/// `(previous_close - open) / open * 100`
///
/// Drives the screener; a negative value reads as "the previous session
/// closed below today's open".
pub fn previous_day_change_pct(previous_close: f64, open_price: f64) -> Option<f64> {
    pct_of(previous_close - open_price, open_price)
}

/// `(high - low) / previous_close * 100`, non-negative whenever `high >= low`.
pub fn amplitude_pct(high_price: f64, low_price: f64, previous_close: f64) -> Option<f64> {
    pct_of(high_price - low_price, previous_close)
}

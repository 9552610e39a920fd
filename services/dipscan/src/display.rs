//! Display formatting for screened records.
//!
//! Numbers use two decimals, prices carry a `¥` prefix, changes are signed
//! percentages and amounts are shown in 亿 (100,000,000). Undefined metrics
//! render as `--`.

use crate::data::QuoteRecord;
use crate::handler::GetStocksResponse;

/// One 亿.
pub const YI: f64 = 100_000_000.0;

/// Placeholder for an undefined value.
pub const UNDEFINED: &str = "--";

pub fn price(value: f64) -> String {
    format!("¥{:.2}", value)
}

pub fn percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:+.2}%", v),
        None => UNDEFINED.to_string(),
    }
}

pub fn amount_yi(value: f64) -> String {
    format!("{:.2}亿", value / YI)
}

/// Single-line summary of a record.
pub fn record_line(record: &QuoteRecord) -> String {
    format!(
        "{} {} {} 涨跌 {} 昨日 {} 振幅 {} 成交额 {}",
        record.code(),
        record.name(),
        price(record.price()),
        percent(record.change()),
        percent(record.previous_day_change()),
        percent(record.amplitude()),
        amount_yi(record.turnover()),
    )
}

/// Plain-text rendering of a response. On error only the message is shown.
pub fn render(response: &GetStocksResponse) -> String {
    match response {
        GetStocksResponse::Error { error } => format!("获取数据失败: {}", error),
        GetStocksResponse::Stocks { stocks } if stocks.is_empty() => {
            "暂无符合条件的股票".to_string()
        }
        GetStocksResponse::Stocks { stocks } => stocks
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {}", i + 1, record_line(r)))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

//! Parser for the futures `<symbol>@bookTicker` stream.
//!
//! ```jsonc
//! { "e": "bookTicker", "u": 400900217, "s": "BTCUSDT",
//!   "b": "43110.1", "B": "31.2", "a": "43110.2", "A": "40.6",
//!   "T": 1700000000000, "E": 1700000000000 }
//! ```
//!
//! Subscription acks (`{"result":null,"id":1}`) and other non-ticker frames
//! parse to `None`.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::BookTicker;

#[derive(Debug, Deserialize)]
struct BookTickerRaw {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    best_bid: Decimal,
    #[serde(rename = "a")]
    best_ask: Decimal,
    #[serde(rename = "E", default)]
    event_time: Option<u64>,
    #[serde(rename = "T", default)]
    transaction_time: Option<u64>,
}

pub fn parse_book_ticker(raw: &str) -> anyhow::Result<Option<BookTicker>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;

    // Combined-stream frames wrap the payload in {"stream": .., "data": ..}.
    let payload = match value.get("data") {
        Some(data) => data.clone(),
        None => value,
    };

    if payload.get("b").is_none() || payload.get("a").is_none() {
        return Ok(None);
    }

    let t: BookTickerRaw = serde_json::from_value(payload)?;
    let event_time_ms = t.event_time.or(t.transaction_time).unwrap_or_default();

    Ok(Some(BookTicker {
        symbol: t.symbol,
        best_bid: t.best_bid,
        best_ask: t.best_ask,
        event_time_ms,
    }))
}

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order direction as the exchange spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "LONG" => Ok(Side::Buy),
            "SELL" | "SHORT" => Ok(Side::Sell),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// Exchange quantisation units for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRules {
    pub symbol: String,
    /// Quantity unit (`LOT_SIZE.stepSize`).
    pub step_size: Decimal,
    /// Price unit (`PRICE_FILTER.tickSize`).
    pub tick_size: Decimal,
}

/// One top-of-book update from the streaming channel.
#[derive(Debug, Clone, PartialEq)]
pub struct BookTicker {
    pub symbol: String,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub event_time_ms: u64,
}

/// Latest cached top-of-book plus the quantity pre-sized from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub observed_at_ms: u64,
    pub derived_quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizingInput {
    pub available_balance: Decimal,
    pub leverage: u32,
    pub reference_price: Decimal,
    pub step_size: Decimal,
    /// Safety margin applied to the balance, strictly below 1.
    pub balance_buffer_ratio: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectivePrice {
    pub stop_price: Decimal,
    pub limit_price: Decimal,
}

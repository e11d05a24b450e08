use market::{Side, SymbolRules};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    #[default]
    Gtc,
    Ioc,
    Fok,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketOrder {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    /// Set for closing orders so they can never grow the position.
    pub reduce_only: bool,
}

impl MarketOrder {
    pub fn to_query(&self) -> String {
        let mut query = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&newOrderRespType=RESULT",
            self.symbol,
            self.side,
            self.quantity.normalize()
        );
        if self.reduce_only {
            query.push_str("&reduceOnly=true");
        }
        query
    }
}

/// Reduce-only stop-limit order that caps the loss on an open position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOrder {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub stop_price: Decimal,
    pub limit_price: Decimal,
    pub reduce_only: bool,
    pub time_in_force: TimeInForce,
}

impl StopOrder {
    pub fn to_query(&self) -> String {
        format!(
            "symbol={}&side={}&type=STOP&quantity={}&price={}&stopPrice={}&reduceOnly={}&timeInForce={}&newOrderRespType=RESULT",
            self.symbol,
            self.side,
            self.quantity.normalize(),
            self.limit_price.normalize(),
            self.stop_price.normalize(),
            self.reduce_only,
            self.time_in_force.as_str()
        )
    }
}

/// Entry fill as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFill {
    pub order_id: i64,
    pub avg_price: Decimal,
    pub executed_qty: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    pub order_id: i64,
    pub status: String,
}

// ---- wire payloads ----

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceEntry {
    pub asset: String,
    pub available_balance: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "LOT_SIZE")]
    LotSize {
        #[serde(rename = "stepSize")]
        step_size: Decimal,
    },
    #[serde(rename = "PRICE_FILTER")]
    PriceFilter {
        #[serde(rename = "tickSize")]
        tick_size: Decimal,
    },
    #[serde(other)]
    Other,
}

impl ExchangeInfoResponse {
    /// Extracts step and tick size for `symbol`.
    pub fn rules_for(&self, symbol: &str) -> Result<SymbolRules, ExchangeError> {
        let info = self
            .symbols
            .iter()
            .find(|s| s.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| ExchangeError::MissingSymbol(symbol.to_string()))?;

        let step_size = info
            .filters
            .iter()
            .find_map(|f| match f {
                SymbolFilter::LotSize { step_size } => Some(*step_size),
                _ => None,
            })
            .ok_or_else(|| ExchangeError::MissingFilter {
                symbol: info.symbol.clone(),
                filter: "LOT_SIZE",
            })?;

        let tick_size = info
            .filters
            .iter()
            .find_map(|f| match f {
                SymbolFilter::PriceFilter { tick_size } => Some(*tick_size),
                _ => None,
            })
            .ok_or_else(|| ExchangeError::MissingFilter {
                symbol: info.symbol.clone(),
                filter: "PRICE_FILTER",
            })?;

        Ok(SymbolRules {
            symbol: info.symbol.clone(),
            step_size,
            tick_size,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeverageResponse {
    pub leverage: u32,
    pub symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub avg_price: Decimal,
    #[serde(default)]
    pub executed_qty: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickerPriceResponse {
    pub symbol: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKeyResponse {
    pub listen_key: String,
}

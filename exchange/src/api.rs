use async_trait::async_trait;
use market::SymbolRules;
use rust_decimal::Decimal;

use crate::error::ExchangeError;
use crate::types::{MarketOrder, OrderAck, OrderFill, StopOrder};

/// Account and order operations used by a trading cycle.
#[async_trait]
pub trait ExchangeApi: Send + Sync + 'static {
    async fn available_balance(&self, asset: &str) -> Result<Decimal, ExchangeError>;

    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ExchangeError>;

    /// Returns the leverage the exchange actually applied.
    async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<u32, ExchangeError>;

    async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderFill, ExchangeError>;

    async fn place_stop_order(&self, order: &StopOrder) -> Result<OrderAck, ExchangeError>;

    /// Public last-trade price. Unauthenticated.
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;
}

#[async_trait]
pub trait ListenKeyApi: Send + Sync + 'static {
    async fn create_listen_key(&self) -> Result<String, ExchangeError>;

    async fn keepalive_listen_key(&self) -> Result<(), ExchangeError>;
}

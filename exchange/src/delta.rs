//! Delta Exchange (India) REST client.
//!
//! Orders are sized in whole contracts of `contract_value` underlying units.
//! [`SymbolRules::step_size`] is reported as the contract value so the shared
//! sizing maths produces a whole number of contracts.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use common::logger::warn_if_slow;
use market::{Side, SymbolRules};
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::api::ExchangeApi;
use crate::client::{decode, retry_on_expired};
use crate::error::ExchangeError;
use crate::signer::{RequestSigner, SigningScheme};
use crate::types::{MarketOrder, OrderAck, OrderFill, StopOrder};

pub const DELTA_VENUE: &str = "Delta Exchange";

const SLOW_ORDER: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Clone, Deserialize)]
struct DeltaBalance {
    asset_symbol: String,
    available_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeltaProduct {
    pub id: u64,
    pub symbol: String,
    pub contract_value: Decimal,
    pub tick_size: Decimal,
}

impl DeltaProduct {
    /// Whole contracts covering at most `quantity` underlying units.
    pub fn contracts(&self, quantity: Decimal) -> Result<u64, ExchangeError> {
        if self.contract_value <= Decimal::ZERO {
            return Err(ExchangeError::Decode(format!(
                "{} has contract value {}",
                self.symbol, self.contract_value
            )));
        }

        let contracts = (quantity / self.contract_value)
            .floor()
            .to_u64()
            .unwrap_or_default();
        if contracts == 0 {
            return Err(ExchangeError::InvalidOrder(format!(
                "{quantity} {} is less than one contract of {}",
                self.symbol, self.contract_value
            )));
        }
        Ok(contracts)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DeltaLeverage {
    leverage: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
struct DeltaOrder {
    id: i64,
    #[serde(default)]
    state: String,
    #[serde(default)]
    size: Decimal,
    #[serde(default)]
    unfilled_size: Decimal,
    #[serde(default)]
    average_fill_price: Option<Decimal>,
}

impl DeltaOrder {
    fn into_fill(self, contract_value: Decimal) -> OrderFill {
        OrderFill {
            order_id: self.id,
            avg_price: self.average_fill_price.unwrap_or_default(),
            executed_qty: (self.size - self.unfilled_size) * contract_value,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DeltaTicker {
    mark_price: Decimal,
}

/// `POST /v2/orders` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct DeltaOrderRequest {
    product_id: u64,
    size: u64,
    side: &'static str,
    order_type: &'static str,
    reduce_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_order_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_in_force: Option<&'static str>,
}

impl DeltaOrderRequest {
    fn market(product: &DeltaProduct, order: &MarketOrder) -> Result<Self, ExchangeError> {
        Ok(Self {
            product_id: product.id,
            size: product.contracts(order.quantity)?,
            side: delta_side(order.side),
            order_type: "market_order",
            reduce_only: order.reduce_only,
            limit_price: None,
            stop_order_type: None,
            stop_price: None,
            time_in_force: None,
        })
    }

    fn stop_loss(product: &DeltaProduct, order: &StopOrder) -> Result<Self, ExchangeError> {
        Ok(Self {
            product_id: product.id,
            size: product.contracts(order.quantity)?,
            side: delta_side(order.side),
            order_type: "limit_order",
            reduce_only: order.reduce_only,
            limit_price: Some(order.limit_price.normalize()),
            stop_order_type: Some("stop_loss_order"),
            stop_price: Some(order.stop_price.normalize()),
            time_in_force: Some(match order.time_in_force {
                crate::types::TimeInForce::Gtc => "gtc",
                crate::types::TimeInForce::Ioc => "ioc",
                crate::types::TimeInForce::Fok => "fok",
            }),
        })
    }
}

fn delta_side(side: Side) -> &'static str {
    match side {
        Side::Buy => "buy",
        Side::Sell => "sell",
    }
}

/// REST client for Delta Exchange perpetuals. Signs with [`SigningScheme::Prehash`].
pub struct DeltaClient {
    http: Client,
    base_url: String,
    signer: RequestSigner,
    products: RwLock<HashMap<String, DeltaProduct>>,
}

impl DeltaClient {
    pub fn new(
        base_url: impl Into<String>,
        signer: RequestSigner,
        timeout: Duration,
    ) -> Result<Self, ExchangeError> {
        if signer.scheme() != SigningScheme::Prehash {
            return Err(ExchangeError::Credentials(
                "Delta Exchange requires prehash signing".into(),
            ));
        }
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("fundsnipe")
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
            products: RwLock::new(HashMap::new()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &str,
        body: &str,
    ) -> Result<T, ExchangeError> {
        retry_on_expired(DELTA_VENUE, path, || {
            self.send_signed(method.clone(), path, query, body)
        })
        .await
    }

    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &str,
        body: &str,
    ) -> Result<T, ExchangeError> {
        let signed = self.signer.sign_now(method.as_str(), path, query, body)?;
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        debug!(%method, %path, timestamp = signed.timestamp, "signed request");

        let mut request = self.http.request(method, &url);
        for (key, value) in &signed.headers {
            request = request.header(*key, value);
        }
        if !body.is_empty() {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        let envelope: Envelope<T> = decode(request.send().await?).await?;
        Ok(envelope.result)
    }

    async fn public<T: DeserializeOwned>(&self, path: &str) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        let envelope: Envelope<T> = decode(self.http.get(&url).send().await?).await?;
        Ok(envelope.result)
    }

    /// Product details, fetched once per symbol.
    pub async fn product(&self, symbol: &str) -> Result<DeltaProduct, ExchangeError> {
        let key = symbol.to_uppercase();
        if let Some(product) = self.products.read().get(&key) {
            return Ok(product.clone());
        }

        let product: DeltaProduct = self.public(&format!("/v2/products/{key}")).await?;
        debug!(symbol = %key, id = product.id, contract_value = %product.contract_value, "product cached");
        self.products.write().insert(key, product.clone());
        Ok(product)
    }

    async fn place(&self, request: &DeltaOrderRequest, label: &'static str) -> Result<DeltaOrder, ExchangeError> {
        let body = serde_json::to_string(request).map_err(|e| ExchangeError::Decode(e.to_string()))?;
        warn_if_slow(label, SLOW_ORDER, self.signed(Method::POST, "/v2/orders", "", &body)).await
    }
}

#[async_trait]
impl ExchangeApi for DeltaClient {
    #[instrument(skip(self))]
    async fn available_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        let balances: Vec<DeltaBalance> = self
            .signed(Method::GET, "/v2/wallet/balances", "", "")
            .await?;

        let balance = balances
            .into_iter()
            .find(|b| b.asset_symbol.eq_ignore_ascii_case(asset))
            .map(|b| b.available_balance)
            .ok_or_else(|| ExchangeError::MissingAsset(asset.to_string()))?;

        info!(%asset, %balance, "available balance");
        Ok(balance)
    }

    #[instrument(skip(self))]
    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ExchangeError> {
        let product = self.product(symbol).await?;
        info!(contract_value = %product.contract_value, tick_size = %product.tick_size, "symbol rules");

        Ok(SymbolRules {
            symbol: product.symbol,
            step_size: product.contract_value,
            tick_size: product.tick_size,
        })
    }

    /// Reads the current order leverage and only changes it when it differs.
    #[instrument(skip(self))]
    async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<u32, ExchangeError> {
        let product = self.product(symbol).await?;
        let path = format!("/v2/products/{}/orders/leverage", product.id);

        let current: DeltaLeverage = self.signed(Method::GET, &path, "", "").await?;
        if current.leverage == Decimal::from(leverage) {
            return Ok(leverage);
        }

        let body = serde_json::json!({ "leverage": leverage }).to_string();
        let applied: DeltaLeverage = self.signed(Method::POST, &path, "", &body).await?;
        let applied = applied.leverage.to_u32().unwrap_or_default();

        if applied != leverage {
            warn!(requested = leverage, applied, "exchange applied different leverage");
        }
        Ok(applied)
    }

    #[instrument(skip(self), fields(symbol = %order.symbol, side = %order.side, quantity = %order.quantity))]
    async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderFill, ExchangeError> {
        let product = self.product(&order.symbol).await?;
        let request = DeltaOrderRequest::market(&product, order)?;
        let resp = self.place(&request, "place_market_order").await?;

        info!(order_id = resp.id, contracts = request.size, state = %resp.state, "market order accepted");
        Ok(resp.into_fill(product.contract_value))
    }

    #[instrument(skip(self), fields(symbol = %order.symbol, side = %order.side, stop = %order.stop_price))]
    async fn place_stop_order(&self, order: &StopOrder) -> Result<OrderAck, ExchangeError> {
        let product = self.product(&order.symbol).await?;
        let request = DeltaOrderRequest::stop_loss(&product, order)?;
        let resp = self.place(&request, "place_stop_order").await?;

        info!(order_id = resp.id, state = %resp.state, "stop order accepted");
        Ok(OrderAck {
            order_id: resp.id,
            status: resp.state,
        })
    }

    /// Mark price; Delta's last trade can lag the book on thin products.
    #[instrument(skip(self))]
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let ticker: DeltaTicker = self
            .public(&format!("/v2/tickers/{}", symbol.to_uppercase()))
            .await?;
        Ok(ticker.mark_price)
    }
}

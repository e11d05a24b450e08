use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use common::logger::warn_if_slow;
use market::SymbolRules;
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::api::{ExchangeApi, ListenKeyApi};
use crate::error::ExchangeError;
use crate::signer::RequestSigner;
use crate::types::{
    BalanceEntry, ExchangeInfoResponse, LeverageResponse, ListenKeyResponse, MarketOrder,
    OrderAck, OrderFill, OrderResponse, StopOrder, TickerPriceResponse,
};

/// Venue name carried by [`ExchangeError::AuthExpired`].
pub const BINANCE_VENUE: &str = "Binance";

/// Pause before re-signing after an expired-signature rejection.
pub const EXPIRED_RETRY_DELAY: Duration = Duration::from_millis(100);

const SLOW_ORDER: Duration = Duration::from_millis(500);

/// Runs `call`; on an expired signature waits briefly and runs it exactly once more.
///
/// `call` must produce a freshly signed request on every invocation. A second
/// expiry surfaces as [`ExchangeError::AuthExpired`]; any other error is returned as is.
pub async fn retry_on_expired<T, F, Fut>(
    venue: &'static str,
    label: &str,
    mut call: F,
) -> Result<T, ExchangeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    match call().await {
        Err(e) if e.is_expired_signature() => {
            warn!(venue, label, code = e.code().unwrap_or_default(), "signature expired; re-signing once");
            tokio::time::sleep(EXPIRED_RETRY_DELAY).await;

            match call().await {
                Err(e) if e.is_expired_signature() => Err(ExchangeError::AuthExpired {
                    venue,
                    code: e.code().unwrap_or_default().to_string(),
                }),
                other => other,
            }
        }
        other => other,
    }
}

/// REST client for USDⓈ-M futures.
pub struct BinanceClient {
    http: Client,
    base_url: String,
    signer: RequestSigner,
}

impl BinanceClient {
    pub fn new(
        base_url: impl Into<String>,
        signer: RequestSigner,
        timeout: Duration,
    ) -> Result<Self, ExchangeError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: String,
    ) -> Result<T, ExchangeError> {
        let query = query.as_str();
        retry_on_expired(BINANCE_VENUE, path, || self.send_signed(method.clone(), path, query)).await
    }

    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &str,
    ) -> Result<T, ExchangeError> {
        let signed = self.signer.sign_now(method.as_str(), path, query, "")?;
        let url = format!(
            "{}{}?{}",
            self.base_url,
            path,
            signed.url_query(self.signer.scheme())
        );
        debug!(%method, %path, timestamp = signed.timestamp, "signed request");

        let mut request = self.http.request(method, &url);
        for (key, value) in &signed.headers {
            request = request.header(*key, value);
        }

        decode(request.send().await?).await
    }

    async fn public<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<T, ExchangeError> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        debug!(%path, "public request");

        decode(self.http.get(&url).send().await?).await
    }

    /// API-key-only request, used by the listen-key endpoints.
    async fn keyed<T: DeserializeOwned>(&self, method: Method, path: &str) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", self.signer.api_key())
            .send()
            .await?;

        decode(response).await
    }
}

pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ExchangeError::from_api_response(status.as_u16(), &body));
    }

    serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(format!("{e}: {body}")))
}

#[async_trait]
impl ExchangeApi for BinanceClient {
    #[instrument(skip(self))]
    async fn available_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        let balances: Vec<BalanceEntry> = self
            .signed(Method::GET, "/fapi/v3/balance", String::new())
            .await?;

        let balance = balances
            .into_iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .map(|b| b.available_balance)
            .ok_or_else(|| ExchangeError::MissingAsset(asset.to_string()))?;

        info!(%asset, %balance, "available balance");
        Ok(balance)
    }

    #[instrument(skip(self))]
    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ExchangeError> {
        let info: ExchangeInfoResponse = self.public("/fapi/v1/exchangeInfo", "").await?;
        let rules = info.rules_for(symbol)?;

        info!(step_size = %rules.step_size, tick_size = %rules.tick_size, "symbol rules");
        Ok(rules)
    }

    #[instrument(skip(self))]
    async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<u32, ExchangeError> {
        let resp: LeverageResponse = self
            .signed(
                Method::POST,
                "/fapi/v1/leverage",
                format!("symbol={symbol}&leverage={leverage}"),
            )
            .await?;

        if resp.leverage != leverage {
            warn!(requested = leverage, applied = resp.leverage, "exchange applied different leverage");
        }
        Ok(resp.leverage)
    }

    #[instrument(skip(self), fields(symbol = %order.symbol, side = %order.side, quantity = %order.quantity))]
    async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderFill, ExchangeError> {
        let resp: OrderResponse = warn_if_slow(
            "place_market_order",
            SLOW_ORDER,
            self.signed(Method::POST, "/fapi/v1/order", order.to_query()),
        )
        .await?;

        info!(order_id = resp.order_id, avg_price = %resp.avg_price, status = %resp.status, "market order accepted");
        Ok(OrderFill {
            order_id: resp.order_id,
            avg_price: resp.avg_price,
            executed_qty: resp.executed_qty,
        })
    }

    #[instrument(skip(self), fields(symbol = %order.symbol, side = %order.side, stop = %order.stop_price))]
    async fn place_stop_order(&self, order: &StopOrder) -> Result<OrderAck, ExchangeError> {
        let resp: OrderResponse = warn_if_slow(
            "place_stop_order",
            SLOW_ORDER,
            self.signed(Method::POST, "/fapi/v1/order", order.to_query()),
        )
        .await?;

        info!(order_id = resp.order_id, status = %resp.status, "stop order accepted");
        Ok(OrderAck {
            order_id: resp.order_id,
            status: resp.status,
        })
    }

    #[instrument(skip(self))]
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let resp: TickerPriceResponse = self
            .public("/fapi/v2/ticker/price", &format!("symbol={symbol}"))
            .await?;
        Ok(resp.price)
    }
}

#[async_trait]
impl ListenKeyApi for BinanceClient {
    async fn create_listen_key(&self) -> Result<String, ExchangeError> {
        let resp: ListenKeyResponse = self.keyed(Method::POST, "/fapi/v1/listenKey").await?;
        info!("listen key created");
        Ok(resp.listen_key)
    }

    async fn keepalive_listen_key(&self) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self.keyed(Method::PUT, "/fapi/v1/listenKey").await?;
        debug!("listen key refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn expired() -> ExchangeError {
        ExchangeError::Api {
            status: 400,
            code: "-1021".into(),
            message: "Timestamp for this request is outside of the recvWindow.".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn expired_then_ok_retries_once() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let out = retry_on_expired(BINANCE_VENUE, "test", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(expired())
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_twice_surfaces_auth_expired() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let start = tokio::time::Instant::now();

        let out: Result<(), _> = retry_on_expired(BINANCE_VENUE, "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(expired())
        })
        .await;

        let err = out.unwrap_err();
        assert!(matches!(err, ExchangeError::AuthExpired { ref code, .. } if code == "-1021"));
        assert_eq!(err.to_string(), "Binance API Error: -1021");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= EXPIRED_RETRY_DELAY);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let out: Result<(), _> = retry_on_expired(BINANCE_VENUE, "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ExchangeError::Api {
                status: 400,
                code: "-2019".into(),
                message: "Margin is insufficient.".into(),
            })
        })
        .await;

        assert!(matches!(out, Err(ExchangeError::Api { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let signer = RequestSigner::new(
            crate::ApiCredentials::new("k", "s"),
            crate::SigningScheme::QueryString,
            5000,
        );
        let client = BinanceClient::new("https://testnet.binancefuture.com/", signer, Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "https://testnet.binancefuture.com");
    }
}

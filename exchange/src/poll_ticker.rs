//! Quote source for venues without a usable top-of-book stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use market::BookTicker;
use market::ticker::TickerSource;
use tokio::sync::mpsc::Sender;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, instrument, warn};

use crate::api::ExchangeApi;

/// Polls [`ExchangeApi::ticker_price`] and reports it as both bid and ask.
pub struct PollingTicker<E: ExchangeApi> {
    api: Arc<E>,
    poll_every: Duration,
}

impl<E: ExchangeApi> PollingTicker<E> {
    pub fn new(api: Arc<E>, poll_every: Duration) -> Self {
        Self { api, poll_every }
    }
}

#[async_trait]
impl<E: ExchangeApi> TickerSource for PollingTicker<E> {
    #[instrument(skip(self, sender), fields(symbol = %symbol))]
    async fn book_ticker_stream(
        &self,
        symbol: String,
        sender: Sender<BookTicker>,
    ) -> anyhow::Result<()> {
        let mut ticker = interval(self.poll_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(every_ms = self.poll_every.as_millis() as u64, "price poller started");

        loop {
            ticker.tick().await;

            if sender.is_closed() {
                return Ok(());
            }

            match self.api.ticker_price(&symbol).await {
                Ok(price) => {
                    let quote = BookTicker {
                        symbol: symbol.to_uppercase(),
                        best_bid: price,
                        best_ask: price,
                        event_time_ms: common::time::now_ms(),
                    };
                    if sender.send(quote).await.is_err() {
                        debug!("price receiver dropped; poller exiting");
                        return Ok(());
                    }
                }
                Err(e) => warn!(error = %e, "ticker poll failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use market::SymbolRules;
    use rust_decimal::Decimal;

    use crate::error::ExchangeError;
    use crate::types::{MarketOrder, OrderAck, OrderFill, StopOrder};

    /// Fails every other poll.
    struct FlakyPrice {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExchangeApi for FlakyPrice {
        async fn available_balance(&self, _: &str) -> Result<Decimal, ExchangeError> {
            unimplemented!()
        }
        async fn symbol_rules(&self, _: &str) -> Result<SymbolRules, ExchangeError> {
            unimplemented!()
        }
        async fn change_leverage(&self, _: &str, _: u32) -> Result<u32, ExchangeError> {
            unimplemented!()
        }
        async fn place_market_order(&self, _: &MarketOrder) -> Result<OrderFill, ExchangeError> {
            unimplemented!()
        }
        async fn place_stop_order(&self, _: &StopOrder) -> Result<OrderAck, ExchangeError> {
            unimplemented!()
        }
        async fn ticker_price(&self, _: &str) -> Result<Decimal, ExchangeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 1 {
                return Err(ExchangeError::Decode("gateway hiccup".into()));
            }
            Ok(Decimal::from(100 + n as i64))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_skip_failures_and_stop_with_receiver() {
        let api = Arc::new(FlakyPrice {
            calls: AtomicUsize::new(0),
        });
        let source = PollingTicker::new(api.clone(), Duration::from_millis(200));
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);

        let task = tokio::spawn(async move { source.book_ticker_stream("btcusd".into(), tx).await });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.symbol, "BTCUSD");
        assert_eq!(first.best_bid, Decimal::from(100));
        assert_eq!(first.best_ask, first.best_bid);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.best_bid, Decimal::from(102));

        drop(rx);
        task.await.unwrap().unwrap();
        assert!(api.calls.load(Ordering::SeqCst) >= 3);
    }
}

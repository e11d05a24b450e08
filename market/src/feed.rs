//! Live top-of-book cache with a continuously pre-sized order quantity.
//!
//! One subscription per feed. The writer task is the only code that mutates
//! the cache; every other caller reads through `quote` / `get_quantity`.
//! The quantity is recomputed on every update so that the read right before
//! order submission is a plain cache lookup.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::FeedError;
use crate::sizing::size_order;
use crate::ticker::TickerSource;
use crate::types::{BookTicker, Quote, Side, SizingInput};

/// Account-side inputs captured when the feed starts.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedParams {
    pub available_balance: Decimal,
    pub leverage: u32,
    pub step_size: Decimal,
    pub balance_buffer_ratio: Decimal,
    /// Entry side; BUY sizes off the ask, SELL off the bid.
    pub side: Side,
}

impl FeedParams {
    fn quantity_for(&self, ticker: &BookTicker) -> Decimal {
        let reference_price = match self.side {
            Side::Buy => ticker.best_ask,
            Side::Sell => ticker.best_bid,
        };
        size_order(&SizingInput {
            available_balance: self.available_balance,
            leverage: self.leverage,
            reference_price,
            step_size: self.step_size,
            balance_buffer_ratio: self.balance_buffer_ratio,
        })
    }
}

struct FeedTasks {
    symbol: String,
    active: Arc<AtomicBool>,
    stream: JoinHandle<()>,
    writer: JoinHandle<()>,
}

pub struct PriceFeed<S: TickerSource> {
    source: Arc<S>,
    quotes: Arc<RwLock<HashMap<String, Quote>>>,
    tasks: Mutex<Option<FeedTasks>>,
    /// `None` accepts quotes of any age.
    max_quote_age_ms: Option<u64>,
    channel_capacity: usize,
}

impl<S: TickerSource> PriceFeed<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            quotes: Arc::new(RwLock::new(HashMap::new())),
            tasks: Mutex::new(None),
            max_quote_age_ms: None,
            channel_capacity: 256,
        }
    }

    pub fn with_max_quote_age(mut self, max_quote_age_ms: Option<u64>) -> Self {
        self.max_quote_age_ms = max_quote_age_ms;
        self
    }

    /// Opens the subscription for `symbol`. A running subscription is stopped first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, symbol: &str, params: FeedParams) {
        self.stop();

        let symbol = symbol.to_uppercase();
        let active = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = mpsc::channel::<BookTicker>(self.channel_capacity);

        info!(
            %symbol,
            balance = %params.available_balance,
            leverage = params.leverage,
            step_size = %params.step_size,
            side = %params.side,
            "starting price feed"
        );

        let source = Arc::clone(&self.source);
        let stream_symbol = symbol.clone();
        let stream = tokio::spawn(
            async move {
                if let Err(e) = source.book_ticker_stream(stream_symbol, tx).await {
                    error!(error = ?e, "bookTicker stream terminated");
                }
            }
            .instrument(info_span!("ticker_stream", symbol = %symbol)),
        );

        let quotes = Arc::clone(&self.quotes);
        let writer_active = Arc::clone(&active);
        let writer_symbol = symbol.clone();
        let writer = tokio::spawn(
            async move {
                while let Some(ticker) = rx.recv().await {
                    if !ticker.symbol.is_empty() && !ticker.symbol.eq_ignore_ascii_case(&writer_symbol) {
                        warn!(got = %ticker.symbol, "ticker for unexpected symbol dropped");
                        continue;
                    }

                    let quote = Quote {
                        bid: ticker.best_bid,
                        ask: ticker.best_ask,
                        observed_at_ms: ticker.event_time_ms,
                        derived_quantity: params.quantity_for(&ticker),
                    };

                    let mut guard = quotes.write();
                    if !writer_active.load(Ordering::Acquire) {
                        break;
                    }
                    guard.insert(writer_symbol.clone(), quote);
                }
                debug!("quote writer exiting");
            }
            .instrument(info_span!("quote_writer", symbol = %symbol)),
        );

        *self.tasks.lock() = Some(FeedTasks {
            symbol,
            active,
            stream,
            writer,
        });
    }

    /// Closes the subscription and clears cached quotes. Safe to call repeatedly.
    pub fn stop(&self) {
        let Some(tasks) = self.tasks.lock().take() else {
            return;
        };

        tasks.active.store(false, Ordering::Release);
        tasks.stream.abort();
        tasks.writer.abort();
        self.quotes.write().clear();

        info!(symbol = %tasks.symbol, "price feed stopped");
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    pub fn quote(&self, symbol: &str) -> Option<Quote> {
        self.quotes.read().get(&symbol.to_uppercase()).cloned()
    }

    /// Last pre-sized quantity for `symbol`.
    pub fn get_quantity(&self, symbol: &str) -> Result<Decimal, FeedError> {
        let symbol = symbol.to_uppercase();
        let quote = self.quote(&symbol).ok_or_else(|| FeedError::NotReady {
            symbol: symbol.clone(),
        })?;

        if let Some(max_age) = self.max_quote_age_ms {
            let age_ms = common::time::now_ms().saturating_sub(quote.observed_at_ms);
            if age_ms > max_age {
                return Err(FeedError::Stale { symbol, age_ms });
            }
        }

        Ok(quote.derived_quantity)
    }

    /// Polls until the first quote for `symbol` arrives.
    pub async fn wait_ready(&self, symbol: &str, timeout: Duration) -> Result<(), FeedError> {
        let poll = async {
            while self.quote(symbol).is_none() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| FeedError::NotReady {
                symbol: symbol.to_uppercase(),
            })?;

        info!(%symbol, "bookTicker ready");
        Ok(())
    }
}

impl<S: TickerSource> Drop for PriceFeed<S> {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.get_mut().take() {
            tasks.active.store(false, Ordering::Release);
            tasks.stream.abort();
            tasks.writer.abort();
        }
    }
}

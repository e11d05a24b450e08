use async_trait::async_trait;
use common::ReconnectBackoff;
use futures::StreamExt;
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, instrument, trace, warn};

use super::TickerSource;
use super::parser::parse_book_ticker;
use crate::types::BookTicker;

/// WebSocket implementation of the book-ticker stream.
pub struct BookTickerWsClient {
    pub ws_base: String,
}

impl BookTickerWsClient {
    /// `ws_base` is the raw-stream root, e.g. `wss://fstream.binance.com/ws`.
    pub fn new(ws_base: impl Into<String>) -> Self {
        Self {
            ws_base: ws_base.into(),
        }
    }

    pub fn stream_url(&self, symbol: &str) -> String {
        format!(
            "{}/{}@bookTicker",
            self.ws_base.trim_end_matches('/'),
            symbol.to_lowercase()
        )
    }
}

#[async_trait]
impl TickerSource for BookTickerWsClient {
    /// Streams updates until the receiver is dropped, reconnecting with backoff.
    #[instrument(skip(self, sender), fields(symbol = %symbol))]
    async fn book_ticker_stream(
        &self,
        symbol: String,
        sender: Sender<BookTicker>,
    ) -> anyhow::Result<()> {
        let url = self.stream_url(&symbol);
        let mut backoff = ReconnectBackoff::market_stream();

        info!(%url, "starting bookTicker stream");

        loop {
            match connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    info!("bookTicker connection established");
                    backoff.connected();
                    let (_write, mut read) = ws.split();

                    while let Some(msg) = read.next().await {
                        let msg = match msg {
                            Ok(m) => m,
                            Err(e) => {
                                warn!(error = ?e, "bookTicker stream error");
                                break;
                            }
                        };

                        if msg.is_close() {
                            warn!("bookTicker stream closed by server");
                            break;
                        }

                        if !msg.is_text() {
                            continue;
                        }

                        let raw = match msg.to_text() {
                            Ok(t) => t,
                            Err(e) => {
                                error!(error = ?e, "failed to extract text from WS message");
                                continue;
                            }
                        };

                        trace!(raw_event = %raw, "received bookTicker frame");

                        match parse_book_ticker(raw) {
                            Ok(Some(ticker)) => {
                                if sender.send(ticker).await.is_err() {
                                    debug!("bookTicker receiver dropped; stream worker exiting");
                                    return Ok(());
                                }
                            }
                            Ok(None) => debug!("non-ticker frame ignored"),
                            Err(e) => warn!(error = ?e, raw = %raw, "failed to parse bookTicker"),
                        }
                    }
                }
                Err(e) => {
                    error!(error = ?e, "bookTicker connection failed");
                }
            }

            if sender.is_closed() {
                return Ok(());
            }

            let delay = backoff.next_delay();
            warn!(delay_ms = delay.as_millis() as u64, "bookTicker disconnected; reconnecting");
            tokio::time::sleep(delay).await;
        }
    }
}

pub mod parser;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc::Sender;

use crate::types::BookTicker;

/// Streaming source of best bid/ask updates for one symbol.
///
/// Implementations own reconnection; they return only when the receiver is
/// dropped or the stream cannot be established at all.
#[async_trait]
pub trait TickerSource: Send + Sync + 'static {
    async fn book_ticker_stream(
        &self,
        symbol: String,
        sender: Sender<BookTicker>,
    ) -> anyhow::Result<()>;
}

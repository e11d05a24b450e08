use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("bookTicker not available yet for {symbol}")]
    NotReady { symbol: String },

    #[error("bookTicker stale for {symbol} ({age_ms} ms old)")]
    Stale { symbol: String, age_ms: u64 },
}

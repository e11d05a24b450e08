pub mod error;
pub mod feed;
pub mod sizing;
pub mod ticker;
pub mod types;

pub use error::FeedError;
pub use feed::{FeedParams, PriceFeed};
pub use types::{BookTicker, ProtectivePrice, Quote, Side, SizingInput, SymbolRules};

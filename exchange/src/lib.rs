pub mod api;
pub mod client;
pub mod credentials;
pub mod delta;
pub mod error;
pub mod poll_ticker;
pub mod signer;
pub mod types;
pub mod user_stream;

pub use api::{ExchangeApi, ListenKeyApi};
pub use client::{BINANCE_VENUE, BinanceClient, retry_on_expired};
pub use credentials::ApiCredentials;
pub use delta::{DELTA_VENUE, DeltaClient, DeltaProduct};
pub use error::ExchangeError;
pub use poll_ticker::PollingTicker;
pub use signer::{RequestSigner, SignedRequest, SigningScheme};
pub use types::{MarketOrder, OrderAck, OrderFill, StopOrder, TimeInForce};
pub use user_stream::{AccountUpdate, BalanceChange, UserStreamMessage};

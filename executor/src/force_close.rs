//! Early exit on an external signal such as a funding-fee settlement.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use exchange::{ExchangeApi, ExchangeError, MarketOrder, OrderFill};
use market::Side;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

use crate::events::TradeEvent;

#[derive(Debug, Clone, PartialEq)]
struct OpenPosition {
    symbol: String,
    side: Side,
    quantity: Decimal,
}

/// Closes the latest entry at most once per entry, and only when enabled.
pub struct ForceCloser<E: ExchangeApi> {
    api: Arc<E>,
    enabled: bool,
    position: Mutex<Option<OpenPosition>>,
    fired: AtomicBool,
}

impl<E: ExchangeApi> ForceCloser<E> {
    pub fn new(api: Arc<E>, enabled: bool) -> Self {
        Self {
            api,
            enabled,
            position: Mutex::new(None),
            fired: AtomicBool::new(false),
        }
    }

    /// Arms the closer for a freshly opened position.
    pub fn track_entry(&self, symbol: &str, side: Side, quantity: Decimal) {
        *self.position.lock() = Some(OpenPosition {
            symbol: symbol.to_string(),
            side,
            quantity,
        });
        self.fired.store(false, Ordering::SeqCst);
    }

    /// Forgets the tracked position. Signals are ignored until the next entry.
    pub fn disarm(&self) {
        if self.position.lock().take().is_some() {
            info!("force-close disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.position.lock().is_some()
    }

    /// Places one opposite-side reduce-only market order. Repeated calls for
    /// the same entry, calls before any entry, and calls while disabled do nothing.
    pub async fn close_now(&self) -> Result<Option<OrderFill>, ExchangeError> {
        let Some(position) = self.position.lock().clone() else {
            info!("close signal before any entry; nothing to close");
            return Ok(None);
        };

        if !self.enabled {
            info!(symbol = %position.symbol, "force-close disabled; signal logged only");
            return Ok(None);
        }

        if self.fired.swap(true, Ordering::SeqCst) {
            info!(symbol = %position.symbol, "force-close already performed");
            return Ok(None);
        }

        let order = MarketOrder {
            symbol: position.symbol.clone(),
            side: position.side.opposite(),
            quantity: position.quantity,
            reduce_only: true,
        };
        warn!(symbol = %order.symbol, side = %order.side, quantity = %order.quantity, "force-closing position");

        self.api.place_market_order(&order).await.map(Some)
    }

    /// Reacts to bus events until the bus closes.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<TradeEvent>) {
        loop {
            match events.recv().await {
                Ok(TradeEvent::CycleStarted { .. }) => self.disarm(),
                Ok(TradeEvent::EntryPlaced {
                    symbol,
                    side,
                    quantity,
                    ..
                }) => self.track_entry(&symbol, side, quantity),
                Ok(TradeEvent::FundingFeeObserved { .. }) => {
                    if let Err(e) = self.close_now().await {
                        error!(error = %e, "force-close order failed");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "force-close listener lagged"),
                Err(RecvError::Closed) => return,
            }
        }
    }
}

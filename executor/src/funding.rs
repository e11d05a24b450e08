use std::collections::HashSet;
use std::sync::Arc;

use exchange::AccountUpdate;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::events::{EventBus, TradeEvent};

/// Tracks which assets have had a funding fee applied since the last clear.
pub struct FundingState {
    resolved: Mutex<HashSet<String>>,
    bus: EventBus,
}

impl FundingState {
    pub fn new(bus: EventBus) -> Self {
        Self {
            resolved: Mutex::new(HashSet::new()),
            bus,
        }
    }

    /// Records funding-fee updates and announces them. Other reasons are ignored.
    pub fn on_account_update(&self, update: &AccountUpdate) {
        if !update.is_funding_fee() {
            debug!(reason = %update.reason, "non-funding account update");
            return;
        }

        let assets: Vec<String> = update
            .balances
            .iter()
            .filter(|b| !b.balance_change.is_zero())
            .map(|b| b.asset.clone())
            .collect();

        self.resolved.lock().extend(assets.iter().cloned());
        info!(?assets, event_time_ms = update.event_time_ms, "funding fee observed");

        self.bus.publish(TradeEvent::FundingFeeObserved {
            assets,
            event_time_ms: update.event_time_ms,
        });
    }

    pub fn is_resolved(&self, asset: &str) -> bool {
        self.resolved.lock().contains(asset)
    }

    /// Clears one asset, or everything when `asset` is `None`.
    pub fn clear(&self, asset: Option<&str>) {
        let mut resolved = self.resolved.lock();
        match asset {
            Some(a) => {
                resolved.remove(a);
            }
            None => resolved.clear(),
        }
    }

    /// Drains account updates until the sender side closes.
    pub async fn run(self: Arc<Self>, mut updates: mpsc::Receiver<AccountUpdate>) {
        while let Some(update) = updates.recv().await {
            self.on_account_update(&update);
        }
        debug!("account update channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange::BalanceChange;
    use rust_decimal::Decimal;

    fn update(reason: &str, change: i64) -> AccountUpdate {
        AccountUpdate {
            event_time_ms: 10,
            reason: reason.into(),
            balances: vec![BalanceChange {
                asset: "USDT".into(),
                wallet_balance: Decimal::from(1000),
                balance_change: Decimal::from(change),
            }],
        }
    }

    #[tokio::test]
    async fn funding_fee_marks_asset_and_publishes() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let state = FundingState::new(bus);

        state.on_account_update(&update("FUNDING_FEE", -1));

        assert!(state.is_resolved("USDT"));
        assert_eq!(
            rx.recv().await.unwrap(),
            TradeEvent::FundingFeeObserved {
                assets: vec!["USDT".into()],
                event_time_ms: 10
            }
        );
    }

    #[test]
    fn other_reasons_do_nothing() {
        let state = FundingState::new(EventBus::default());
        state.on_account_update(&update("ORDER", -1));
        assert!(!state.is_resolved("USDT"));
    }

    #[test]
    fn clear_one_or_all() {
        let state = FundingState::new(EventBus::default());
        state.on_account_update(&update("FUNDING_FEE", 2));
        state.clear(Some("BNB"));
        assert!(state.is_resolved("USDT"));
        state.clear(None);
        assert!(!state.is_resolved("USDT"));
    }

    #[tokio::test]
    async fn run_consumes_channel() {
        let state = Arc::new(FundingState::new(EventBus::default()));
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(state.clone().run(rx));

        tx.send(update("FUNDING_FEE", -3)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(state.is_resolved("USDT"));
    }
}

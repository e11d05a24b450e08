use market::Side;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum TradeEvent {
    /// A new cycle began; nothing it trades is open yet.
    CycleStarted {
        symbol: String,
        trace_id: String,
    },
    EntryPlaced {
        symbol: String,
        side: Side,
        order_id: i64,
        fill_price: Decimal,
        quantity: Decimal,
    },
    FundingFeeObserved {
        assets: Vec<String>,
        event_time_ms: u64,
    },
    ProtectionPlaced {
        symbol: String,
        order_id: i64,
    },
    ProtectionFailed {
        symbol: String,
        attempts: u32,
    },
}

impl TradeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TradeEvent::CycleStarted { .. } => "cycle.started",
            TradeEvent::EntryPlaced { .. } => "entry.placed",
            TradeEvent::FundingFeeObserved { .. } => "funding.fee",
            TradeEvent::ProtectionPlaced { .. } => "protection.placed",
            TradeEvent::ProtectionFailed { .. } => "protection.failed",
        }
    }
}

/// Fan-out relay. Every subscriber sees each event once.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TradeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of subscribers that will see the event.
    pub fn publish(&self, event: TradeEvent) -> usize {
        let name = event.name();
        let delivered = self.tx.send(event).unwrap_or(0);
        debug!(event = name, delivered, "event published");
        delivered
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradeEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_each_event_once() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let event = TradeEvent::FundingFeeObserved {
            assets: vec!["USDT".into()],
            event_time_ms: 1,
        };
        assert_eq!(bus.publish(event.clone()), 2);

        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::default();
        assert_eq!(
            bus.publish(TradeEvent::ProtectionFailed {
                symbol: "BTCUSDT".into(),
                attempts: 8
            }),
            0
        );
    }
}

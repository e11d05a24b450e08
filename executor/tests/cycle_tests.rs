
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use executor::{
    CycleError, CycleState, EventBus, ExecutorConfig, OrderExecutor, ProtectionOutcome,
    RetryPolicy, SymbolSelection, TradeEvent,
};
use market::Side;
use mock_exchange::{FixedTicker, MockExchange, ScriptedTicker, d};
use scheduler::{AnchoredClock, DelayCoordinator};
use tracing_test::traced_test;

type TestExecutor = OrderExecutor<MockExchange, FixedTicker, AnchoredClock>;

fn kolkata(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Kolkata
        .with_ymd_and_hms(2025, 3, 10, h, m, s)
        .unwrap()
        .with_timezone(&Utc)
}

fn config() -> ExecutorConfig {
    ExecutorConfig {
        symbol: "BTCUSDT".into(),
        quote_asset: "USDT".into(),
        leverage: 5,
        balance_buffer_ratio: d("0.9"),
        stop_loss_pct: d("0.002"),
        limit_loss_pct: d("0.003"),
        entry_side: Side::Buy,
        entry_offset: "59.780".parse().unwrap(),
        protection_offset: "60.250".parse().unwrap(),
        protection_retry: RetryPolicy::fixed(8, Duration::from_millis(250)),
        handoff_timeout: Duration::from_secs(30),
        max_quote_age_ms: None,
    }
}

fn executor(api: Arc<MockExchange>, ticker: Arc<FixedTicker>, bus: EventBus) -> TestExecutor {
    let clock = Arc::new(AnchoredClock::new(kolkata(20, 29, 59)));
    OrderExecutor::new(api, ticker, DelayCoordinator::new(clock, Kolkata), bus, config())
}

#[tokio::test(start_paused = true)]
async fn full_cycle_enters_and_protects() {
    let api = Arc::new(MockExchange::default());
    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let exec = executor(api.clone(), FixedTicker::at("99.9", "100"), bus);
    let started = tokio::time::Instant::now();

    let report = exec.run_cycle().await.unwrap();

    use CycleState::*;
    assert_eq!(
        report.trail,
        vec![Idle, RulesFetched, FeedActive, Sized, EntrySubmitted, ProtectionSubmitted, Closed]
    );
    assert_eq!(report.quantity, d("45"));
    assert_eq!(report.protective.stop_price, d("99.8"));
    assert_eq!(report.protective.limit_price, d("99.7"));
    assert_eq!(report.outcome, ProtectionOutcome::Placed { order_id: 2000 });

    let entry = api.market_orders.lock().unwrap()[0].clone();
    assert_eq!(entry.side, Side::Buy);
    assert_eq!(entry.quantity, d("45"));
    assert!(!entry.reduce_only);

    let stop = api.stop_orders.lock().unwrap()[0].clone();
    assert_eq!(stop.side, Side::Sell);
    assert!(stop.reduce_only);
    assert_eq!(stop.quantity, d("45"));

    // entry at :59.780, protection at :00.250 of the next minute
    assert!(started.elapsed() >= Duration::from_millis(1250));
    assert!(!exec.feed().is_running());

    assert!(matches!(
        events.recv().await.unwrap(),
        TradeEvent::CycleStarted { ref symbol, .. } if symbol == "BTCUSDT"
    ));
    match events.recv().await.unwrap() {
        TradeEvent::EntryPlaced { order_id, fill_price, .. } => {
            assert_eq!(order_id, 1000);
            assert_eq!(fill_price, d("100"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn exhausted_protection_raises_alert_after_eight_attempts() {
    let api = Arc::new(MockExchange {
        stop_failures: usize::MAX,
        ..Default::default()
    });
    let exec = executor(api.clone(), FixedTicker::at("99.9", "100"), EventBus::default());

    let err = exec.run_cycle().await.unwrap_err();

    assert!(matches!(err, CycleError::ProtectionFailed { attempts: 8, entry_order_id: 1000, .. }));
    assert!(err.is_unprotected_position());
    assert_eq!(api.stop_calls(), 8);
    assert_eq!(api.market_calls(), 1);
    assert!(!exec.feed().is_running());
    assert!(logs_contain("UNPROTECTED_POSITION"));
}

#[tokio::test(start_paused = true)]
async fn transient_protection_failures_are_retried() {
    let api = Arc::new(MockExchange {
        stop_failures: 3,
        ..Default::default()
    });
    let exec = executor(api.clone(), FixedTicker::at("99.9", "100"), EventBus::default());

    let report = exec.run_cycle().await.unwrap();

    assert_eq!(api.stop_calls(), 4);
    assert_eq!(report.outcome, ProtectionOutcome::Placed { order_id: 2003 });
}

#[tokio::test(start_paused = true)]
async fn rejected_entry_aborts_without_protection() {
    let api = Arc::new(MockExchange {
        reject_entry: true,
        ..Default::default()
    });
    let exec = executor(api.clone(), FixedTicker::at("99.9", "100"), EventBus::default());

    let err = exec.run_cycle().await.unwrap_err();

    assert!(matches!(err, CycleError::EntryRejected(_)));
    assert_eq!(api.market_calls(), 1);
    assert_eq!(api.stop_calls(), 0);
    assert!(!exec.feed().is_running());
}

#[tokio::test(start_paused = true)]
async fn failed_rule_fetch_places_nothing() {
    let api = Arc::new(MockExchange {
        fail_balance: true,
        ..Default::default()
    });
    let exec = executor(api.clone(), FixedTicker::at("99.9", "100"), EventBus::default());

    let err = exec.run_cycle().await.unwrap_err();

    assert!(matches!(err, CycleError::RuleFetchFailed { what: "balance", .. }));
    assert_eq!(api.market_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn silent_feed_aborts_before_entry() {
    let api = Arc::new(MockExchange::default());
    let exec = executor(api.clone(), FixedTicker::silent(), EventBus::default());

    let err = exec.run_cycle().await.unwrap_err();

    assert!(matches!(err, CycleError::FeedNotReady(_)));
    assert_eq!(api.market_calls(), 0);
    assert!(!exec.feed().is_running());
}

#[tokio::test(start_paused = true)]
async fn zero_balance_aborts_with_zero_quantity() {
    let api = Arc::new(MockExchange {
        balance: d("0"),
        ..Default::default()
    });
    let exec = executor(api.clone(), FixedTicker::at("99.9", "100"), EventBus::default());

    let err = exec.run_cycle().await.unwrap_err();

    assert!(matches!(err, CycleError::ZeroQuantity { .. }));
    assert_eq!(api.market_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_handoff_resolves_to_unavailable() {
    let api = Arc::new(MockExchange::default());
    let exec = executor(api.clone(), FixedTicker::at("99.9", "100"), EventBus::default());

    // a sibling consumes the staged order during the protection wait
    let mailbox = exec.mailbox().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        mailbox.delete("protective:BTCUSDT");
    });

    let report = exec.run_cycle().await.unwrap();

    assert_eq!(report.outcome, ProtectionOutcome::Unavailable);
    assert_eq!(report.trail.last(), Some(&CycleState::Closed));
    assert_eq!(api.stop_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn selected_symbol_overrides_configured_one() {
    let api = Arc::new(MockExchange::default());
    let selection = Arc::new(SymbolSelection::new());
    selection.set("ethusdt", None);
    let exec = executor(api.clone(), FixedTicker::at("99.9", "100"), EventBus::default())
        .with_selection(selection);

    let report = exec.run_cycle().await.unwrap();

    assert_eq!(report.symbol, "ETHUSDT");
    assert_eq!(api.market_orders.lock().unwrap()[0].symbol, "ETHUSDT");
}

#[tokio::test(start_paused = true)]
async fn missing_average_price_uses_cached_quote() {
    let api = Arc::new(MockExchange {
        fill_price: d("0"),
        ..MockExchange::default()
    });
    let exec = executor(api.clone(), FixedTicker::at("99.9", "100"), EventBus::default());

    let report = exec.run_cycle().await.unwrap();

    assert_eq!(report.protective.stop_price, d("99.8"));
    assert_eq!(report.protective.limit_price, d("99.7"));
    assert_eq!(api.stop_orders.lock().unwrap()[0].stop_price, d("99.8"));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn entry_without_any_price_fails_loudly_and_places_no_stop() {
    let api = Arc::new(MockExchange {
        fill_price: d("0"),
        entry_latency: Duration::from_millis(100),
        ..MockExchange::default()
    });
    // a zeroed quote lands while the entry order is in flight
    let ticker = ScriptedTicker::new(&[(10, "99.9", "100"), (800, "0", "0")]);
    let clock = Arc::new(AnchoredClock::new(kolkata(20, 29, 59)));
    let exec = OrderExecutor::new(
        api.clone(),
        ticker,
        DelayCoordinator::new(clock, Kolkata),
        EventBus::default(),
        config(),
    );

    let err = exec.run_cycle().await.unwrap_err();

    assert!(matches!(err, CycleError::FillPriceUnknown { entry_order_id: 1000, .. }));
    assert!(err.is_unprotected_position());
    assert_eq!(api.market_calls(), 1);
    assert_eq!(api.stop_calls(), 0);
    assert!(logs_contain("UNPROTECTED_POSITION"));
}

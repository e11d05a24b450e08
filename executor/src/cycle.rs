//! One time-aligned trading cycle: size, enter, protect.

use std::sync::Arc;

use common::logger::{TraceId, child_span, cycle_span};
use exchange::{ExchangeApi, MarketOrder, OrderFill, StopOrder, TimeInForce};
use market::sizing::protective_prices;
use market::ticker::TickerSource;
use market::{FeedParams, PriceFeed, ProtectivePrice, Side};
use rust_decimal::Decimal;
use scheduler::{Clock, DelayCoordinator, WaitOutcome};
use tracing::{Instrument, error, info, warn};

use crate::config::ExecutorConfig;
use crate::error::CycleError;
use crate::events::{EventBus, TradeEvent};
use crate::mailbox::Mailbox;
use crate::selection::SymbolSelection;
use crate::state::{CycleState, StateTracker};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectionOutcome {
    Placed { order_id: i64 },
    /// The handed-off stop order never arrived; nothing was submitted.
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub trace_id: TraceId,
    pub symbol: String,
    pub trail: Vec<CycleState>,
    pub quantity: Decimal,
    pub entry: OrderFill,
    pub protective: ProtectivePrice,
    pub outcome: ProtectionOutcome,
}

pub struct OrderExecutor<E, S, C>
where
    E: ExchangeApi,
    S: TickerSource,
    C: Clock,
{
    api: Arc<E>,
    feed: PriceFeed<S>,
    delay: DelayCoordinator<C>,
    bus: EventBus,
    mailbox: Arc<Mailbox<StopOrder>>,
    selection: Arc<SymbolSelection>,
    cfg: ExecutorConfig,
}

fn handoff_key(symbol: &str) -> String {
    format!("protective:{symbol}")
}

impl<E, S, C> OrderExecutor<E, S, C>
where
    E: ExchangeApi,
    S: TickerSource,
    C: Clock,
{
    pub fn new(
        api: Arc<E>,
        ticker: Arc<S>,
        delay: DelayCoordinator<C>,
        bus: EventBus,
        cfg: ExecutorConfig,
    ) -> Self {
        Self {
            api,
            feed: PriceFeed::new(ticker).with_max_quote_age(cfg.max_quote_age_ms),
            delay,
            bus,
            mailbox: Arc::new(Mailbox::new()),
            selection: Arc::new(SymbolSelection::new()),
            cfg,
        }
    }

    pub fn with_selection(mut self, selection: Arc<SymbolSelection>) -> Self {
        self.selection = selection;
        self
    }

    pub fn mailbox(&self) -> &Arc<Mailbox<StopOrder>> {
        &self.mailbox
    }

    pub fn feed(&self) -> &PriceFeed<S> {
        &self.feed
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.cfg
    }

    /// Runs one cycle. The price feed is stopped on every exit path.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let symbol = self.selection.resolve(&self.cfg.symbol);
        let trace_id = TraceId::new();
        let span = cycle_span("trading_cycle", &trace_id, &symbol);

        async {
            self.bus.publish(TradeEvent::CycleStarted {
                symbol: symbol.clone(),
                trace_id: trace_id.to_string(),
            });

            let mut tracker = StateTracker::new();
            let result = self.drive(&symbol, trace_id, &mut tracker).await;
            self.feed.stop();

            match result {
                Ok(mut report) => {
                    tracker.advance(CycleState::Closed);
                    report.trail = tracker.trail().to_vec();
                    info!(trail = ?report.trail, outcome = ?report.outcome, "cycle complete");
                    Ok(report)
                }
                Err(e) => {
                    tracker.advance(CycleState::Failed);
                    error!(kind = e.kind(), error = %e, trail = ?tracker.trail(), "cycle failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        symbol: &str,
        trace_id: TraceId,
        tracker: &mut StateTracker,
    ) -> Result<CycleReport, CycleError> {
        let cfg = &self.cfg;
        let side = cfg.entry_side;

        let (rules, balance, leverage) = tokio::try_join!(
            async {
                self.api
                    .symbol_rules(symbol)
                    .await
                    .map_err(CycleError::rule_fetch("exchange rules"))
            },
            async {
                self.api
                    .available_balance(&cfg.quote_asset)
                    .await
                    .map_err(CycleError::rule_fetch("balance"))
            },
            async {
                self.api
                    .change_leverage(symbol, cfg.leverage)
                    .await
                    .map_err(CycleError::rule_fetch("leverage"))
            },
        )?;
        tracker.advance(CycleState::RulesFetched);

        self.feed.start(
            symbol,
            FeedParams {
                available_balance: balance,
                leverage,
                step_size: rules.step_size,
                balance_buffer_ratio: cfg.balance_buffer_ratio,
                side,
            },
        );
        tracker.advance(CycleState::FeedActive);

        if self.delay.await_offset(cfg.entry_offset).await == WaitOutcome::AlreadyPassed {
            warn!(offset = %cfg.entry_offset, "entry offset already passed; entering now");
        }

        let quantity = self.feed.get_quantity(symbol)?;
        if quantity.is_zero() {
            return Err(CycleError::ZeroQuantity {
                symbol: symbol.to_string(),
            });
        }
        tracker.advance(CycleState::Sized);

        let entry = self
            .api
            .place_market_order(&MarketOrder {
                symbol: symbol.to_string(),
                side,
                quantity,
                reduce_only: false,
            })
            .instrument(child_span("entry"))
            .await
            .map_err(CycleError::entry_rejected)?;
        tracker.advance(CycleState::EntrySubmitted);

        let filled_qty = if entry.executed_qty.is_zero() {
            quantity
        } else {
            entry.executed_qty
        };
        let fill_price = self.fill_price(symbol, side, &entry).await?;

        self.bus.publish(TradeEvent::EntryPlaced {
            symbol: symbol.to_string(),
            side,
            order_id: entry.order_id,
            fill_price,
            quantity: filled_qty,
        });

        let protective = protective_prices(
            fill_price,
            side,
            cfg.stop_loss_pct,
            cfg.limit_loss_pct,
            rules.tick_size,
        );
        info!(
            entry_order_id = entry.order_id,
            %fill_price,
            stop = %protective.stop_price,
            limit = %protective.limit_price,
            "entry filled; protective order staged"
        );

        let key = handoff_key(symbol);
        self.mailbox.set(
            &key,
            StopOrder {
                symbol: symbol.to_string(),
                side: side.opposite(),
                quantity: filled_qty,
                stop_price: protective.stop_price,
                limit_price: protective.limit_price,
                reduce_only: true,
                time_in_force: TimeInForce::Gtc,
            },
            cfg.handoff_timeout,
        );

        self.delay.await_offset(cfg.protection_offset).await;

        let mut report = CycleReport {
            trace_id,
            symbol: symbol.to_string(),
            trail: Vec::new(),
            quantity: filled_qty,
            entry,
            protective,
            outcome: ProtectionOutcome::Unavailable,
        };

        let Some(stop) = self.mailbox.wait_take(&key, cfg.handoff_timeout).await else {
            error!(
                target: "alert",
                alert = "UNPROTECTED_POSITION",
                %symbol,
                entry_order_id = report.entry.order_id,
                "no protective order available after handoff wait"
            );
            return Ok(report);
        };

        let ack = self.protect(&stop, report.entry.order_id).await?;
        tracker.advance(CycleState::ProtectionSubmitted);
        report.outcome = ProtectionOutcome::Placed {
            order_id: ack.order_id,
        };
        Ok(report)
    }

    /// Average fill price. Falls back to the feed's reference price, then to
    /// the venue's ticker; a position with no known price cannot be protected.
    async fn fill_price(&self, symbol: &str, side: Side, entry: &OrderFill) -> Result<Decimal, CycleError> {
        if !entry.avg_price.is_zero() {
            return Ok(entry.avg_price);
        }

        let cached = self.feed.quote(symbol).map(|q| match side {
            Side::Buy => q.ask,
            Side::Sell => q.bid,
        });
        if let Some(price) = cached.filter(|p| !p.is_zero()) {
            warn!(%price, "entry response carried no average price; using cached quote");
            return Ok(price);
        }

        match self.api.ticker_price(symbol).await {
            Ok(price) if !price.is_zero() => {
                warn!(%price, "entry response carried no average price; using ticker price");
                Ok(price)
            }
            other => {
                error!(
                    target: "alert",
                    alert = "UNPROTECTED_POSITION",
                    %symbol,
                    entry_order_id = entry.order_id,
                    ticker = ?other.as_ref().map_err(|e| e.to_string()),
                    "no price to derive a protective order from"
                );
                Err(CycleError::FillPriceUnknown {
                    symbol: symbol.to_string(),
                    entry_order_id: entry.order_id,
                })
            }
        }
    }

    async fn protect(
        &self,
        stop: &StopOrder,
        entry_order_id: i64,
    ) -> Result<exchange::OrderAck, CycleError> {
        let policy = &self.cfg.protection_retry;

        match policy
            .run("place_stop_order", || self.api.place_stop_order(stop))
            .instrument(child_span("protection"))
            .await
        {
            Ok(ack) => {
                info!(order_id = ack.order_id, "protective order placed");
                self.bus.publish(TradeEvent::ProtectionPlaced {
                    symbol: stop.symbol.clone(),
                    order_id: ack.order_id,
                });
                Ok(ack)
            }
            Err(exhausted) => {
                error!(
                    target: "alert",
                    alert = "UNPROTECTED_POSITION",
                    symbol = %stop.symbol,
                    entry_order_id,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "protective order failed; position is unprotected"
                );
                self.bus.publish(TradeEvent::ProtectionFailed {
                    symbol: stop.symbol.clone(),
                    attempts: exhausted.attempts,
                });
                Err(CycleError::ProtectionFailed {
                    symbol: stop.symbol.clone(),
                    entry_order_id,
                    attempts: exhausted.attempts,
                    last_error: exhausted.last_error.to_string(),
                })
            }
        }
    }
}

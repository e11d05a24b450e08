mod cli;
mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use common::logger::init_tracing;
use exchange::user_stream::run_user_stream;
use exchange::{
    AccountUpdate, ApiCredentials, BinanceClient, DeltaClient, ExchangeApi, PollingTicker,
    RequestSigner, SigningScheme,
};
use executor::{EventBus, ForceCloser, FundingState, OrderExecutor, SymbolSelection};
use market::ticker::TickerSource;
use market::ticker::ws::BookTickerWsClient;
use market::{FeedParams, PriceFeed};
use rust_decimal::Decimal;
use scheduler::{DelayCoordinator, SystemClock, TriggerSchedule};
use tokio::sync::{mpsc, watch};

use crate::cli::{Cli, Command};
use crate::config::{AppConfig, Venue};

/// Starts the venue's account stream, if it has one. Returns whether it started.
type AccountStream = Box<dyn FnOnce(mpsc::Sender<AccountUpdate>, watch::Receiver<bool>) -> bool>;

/// Commands that only read market data run without keys.
fn credentials_or_blank(cfg: &AppConfig) -> ApiCredentials {
    cfg.credentials
        .clone()
        .unwrap_or_else(|| ApiCredentials::new("", ""))
}

fn binance_stack(cfg: &AppConfig) -> anyhow::Result<(Arc<BinanceClient>, Arc<BookTickerWsClient>)> {
    let signer = RequestSigner::new(
        credentials_or_blank(cfg),
        SigningScheme::QueryString,
        cfg.recv_window_ms,
    );
    let client = Arc::new(BinanceClient::new(&cfg.base_url, signer, cfg.request_timeout)?);
    let ticker = Arc::new(BookTickerWsClient::new(cfg.ws_url.clone()));
    Ok((client, ticker))
}

fn delta_stack(
    cfg: &AppConfig,
) -> anyhow::Result<(Arc<DeltaClient>, Arc<PollingTicker<DeltaClient>>)> {
    let signer = RequestSigner::new(
        credentials_or_blank(cfg),
        SigningScheme::Prehash,
        cfg.recv_window_ms,
    );
    let client = Arc::new(DeltaClient::new(&cfg.base_url, signer, cfg.request_timeout)?);
    let ticker = Arc::new(PollingTicker::new(client.clone(), cfg.price_poll));
    Ok((client, ticker))
}

fn build_executor<E, S>(
    cfg: &AppConfig,
    client: Arc<E>,
    ticker: Arc<S>,
    bus: EventBus,
    selection: Arc<SymbolSelection>,
) -> anyhow::Result<OrderExecutor<E, S, SystemClock>>
where
    E: ExchangeApi,
    S: TickerSource,
{
    let trading = cfg.trading()?;
    let delay = DelayCoordinator::new(Arc::new(SystemClock), cfg.timezone);

    Ok(OrderExecutor::new(client, ticker, delay, bus, trading).with_selection(selection))
}

async fn run_once<E, S>(
    cfg: &AppConfig,
    client: Arc<E>,
    ticker: Arc<S>,
    symbol: Option<String>,
) -> anyhow::Result<()>
where
    E: ExchangeApi,
    S: TickerSource,
{
    cfg.require_credentials()?;
    let selection = Arc::new(SymbolSelection::new());
    if let Some(symbol) = symbol {
        selection.set(&symbol, None);
    }

    let executor = build_executor(cfg, client, ticker, EventBus::default(), selection)?;
    let report = executor.run_cycle().await?;

    println!(
        "{} entry #{} qty {} @ {} stop {} limit {} -> {:?}",
        report.symbol,
        report.entry.order_id,
        report.quantity,
        report.entry.avg_price,
        report.protective.stop_price,
        report.protective.limit_price,
        report.outcome
    );
    Ok(())
}

async fn run_daemon<E, S>(
    cfg: &AppConfig,
    client: Arc<E>,
    ticker: Arc<S>,
    account_stream: Option<AccountStream>,
) -> anyhow::Result<()>
where
    E: ExchangeApi,
    S: TickerSource,
{
    if cfg.triggers.is_empty() {
        bail!("DAILY_TRIGGERS is empty; nothing to schedule");
    }
    cfg.require_credentials()?;

    let bus = EventBus::default();
    let executor = build_executor(
        cfg,
        client.clone(),
        ticker,
        bus.clone(),
        Arc::new(SymbolSelection::new()),
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let closer = Arc::new(ForceCloser::new(client.clone(), cfg.force_close_enabled));
    tokio::spawn(closer.run(bus.subscribe()));

    let funding = Arc::new(FundingState::new(bus.clone()));
    if let Some(start_stream) = account_stream {
        let (updates_tx, updates_rx) = mpsc::channel(64);
        if start_stream(updates_tx, shutdown_rx.clone()) {
            tokio::spawn(funding.clone().run(updates_rx));
        }
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let schedule = TriggerSchedule::new(cfg.triggers.clone());
    let executor = &executor;
    let funding = &funding;

    schedule
        .run(&SystemClock, shutdown_rx, |trigger| async move {
            funding.clear(None);
            match executor.run_cycle().await {
                Ok(report) => tracing::info!(
                    trigger = %trigger.name,
                    entry_order_id = report.entry.order_id,
                    outcome = ?report.outcome,
                    "scheduled cycle finished"
                ),
                Err(e) => tracing::error!(
                    trigger = %trigger.name,
                    kind = e.kind(),
                    unprotected = e.is_unprotected_position(),
                    error = %e,
                    "scheduled cycle failed"
                ),
            }
        })
        .await;

    Ok(())
}

async fn show_book<E, S>(
    cfg: &AppConfig,
    client: Arc<E>,
    ticker: Arc<S>,
    symbol: &str,
    timeout: Duration,
) -> anyhow::Result<()>
where
    E: ExchangeApi,
    S: TickerSource,
{
    let rules = client.symbol_rules(symbol).await?;
    let balance = if cfg.credentials.is_some() {
        client
            .available_balance(&cfg.executor.quote_asset)
            .await
            .unwrap_or(Decimal::ZERO)
    } else {
        Decimal::ZERO
    };

    let feed = PriceFeed::new(ticker);
    feed.start(
        symbol,
        FeedParams {
            available_balance: balance,
            leverage: cfg.executor.leverage,
            step_size: rules.step_size,
            balance_buffer_ratio: cfg.executor.balance_buffer_ratio,
            side: cfg.executor.entry_side,
        },
    );

    let ready = feed.wait_ready(symbol, timeout).await;
    let quote = feed.quote(symbol);
    feed.stop();
    ready?;

    let quote = quote.context("feed stopped before a quote was read")?;
    println!(
        "{} bid {} ask {} qty {} (balance {})",
        symbol.to_uppercase(),
        quote.bid,
        quote.ask,
        quote.derived_quantity,
        balance
    );
    Ok(())
}

async fn dispatch<E, S>(
    cfg: &AppConfig,
    command: Command,
    client: Arc<E>,
    ticker: Arc<S>,
    account_stream: Option<AccountStream>,
) -> anyhow::Result<()>
where
    E: ExchangeApi,
    S: TickerSource,
{
    match command {
        Command::Run { .. } => run_daemon(cfg, client, ticker, account_stream).await?,
        Command::Cycle { symbol } => run_once(cfg, client, ticker, symbol).await?,
        Command::Price { symbol } => {
            let price = client.ticker_price(&symbol.to_uppercase()).await?;
            println!("{} {}", symbol.to_uppercase(), price);
        }
        Command::Book { symbol, timeout_secs } => {
            show_book(cfg, client, ticker, &symbol, Duration::from_secs(timeout_secs)).await?
        }
        Command::Ping => {
            cfg.require_credentials()?;
            let balance = client.available_balance(&cfg.executor.quote_asset).await?;
            println!("ok: {} {}", balance, cfg.executor.quote_asset);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let cfg = AppConfig::from_env().context("failed to load configuration")?;
    init_tracing("fundsnipe", cfg.is_production || cli.json_logs);

    let wants_user_stream = matches!(cli.command, Command::Run { no_user_stream: false });
    tracing::info!(venue = ?cfg.venue, base_url = %cfg.base_url, "configuration loaded");

    match cfg.venue {
        Venue::Binance => {
            let (client, ticker) = binance_stack(&cfg)?;
            let account_stream = wants_user_stream.then(|| {
                let client = client.clone();
                let ws_url = cfg.ws_url.clone();
                Box::new(move |updates: mpsc::Sender<AccountUpdate>, shutdown: watch::Receiver<bool>| {
                    tokio::spawn(async move {
                        if let Err(e) = run_user_stream(client, ws_url, updates, shutdown).await {
                            tracing::error!(error = %e, "user stream stopped");
                        }
                    });
                    true
                }) as AccountStream
            });
            dispatch(&cfg, cli.command, client, ticker, account_stream).await
        }
        Venue::Delta => {
            let (client, ticker) = delta_stack(&cfg)?;
            if wants_user_stream {
                tracing::warn!("Delta Exchange has no account stream wired; funding fees are not observed");
            }
            dispatch(&cfg, cli.command, client, ticker, None).await
        }
    }
}

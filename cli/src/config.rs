use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use chrono_tz::Tz;
use exchange::ApiCredentials;
use executor::{ExecutorConfig, RetryPolicy};
use market::Side;
use rust_decimal::Decimal;
use scheduler::{DailyTrigger, TimingOffset, parse_triggers};

/// Exchange the bot trades on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Venue {
    Binance,
    Delta,
}

impl Venue {
    /// Prefix of the venue-specific environment variables.
    pub fn env_prefix(self) -> &'static str {
        match self {
            Venue::Binance => "BINANCE",
            Venue::Delta => "DELTA",
        }
    }
}

impl FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(Venue::Binance),
            "delta" => Ok(Venue::Delta),
            other => Err(format!("unknown venue {other:?} (expected binance or delta)")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub venue: Venue,
    pub base_url: String,
    /// Root for both the market and the account streams.
    pub ws_url: String,
    pub credentials: Option<ApiCredentials>,
    pub recv_window_ms: u64,
    pub request_timeout: Duration,
    /// REST polling cadence for venues without a book-ticker stream.
    pub price_poll: Duration,

    pub timezone: Tz,
    pub triggers: Vec<DailyTrigger>,

    /// Off by default: funding-fee signals are only logged.
    pub force_close_enabled: bool,
    pub is_production: bool,

    /// Cycle parameters. Checked by [`AppConfig::trading`].
    pub executor: ExecutorConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let venue: Venue = parse_or(&get, "EXCHANGE_VENUE", Venue::Binance)?;
        let prefix = venue.env_prefix();
        let venue_var = |suffix: &str| get(&format!("{prefix}_{suffix}"));

        let credentials = match (venue_var("API_KEY"), venue_var("API_SECRET")) {
            (Some(key), Some(secret)) => Some(ApiCredentials::new(key, secret)),
            (None, None) => None,
            _ => bail!("{prefix}_API_KEY and {prefix}_API_SECRET must be set together"),
        };

        let (default_base, default_quote) = match venue {
            Venue::Binance => ("https://testnet.binancefuture.com", "USDT"),
            Venue::Delta => ("https://api.india.delta.exchange", "USD"),
        };

        let timezone: Tz = parse_or(&get, "TIMEZONE", chrono_tz::Asia::Kolkata)?;
        let triggers = match get("DAILY_TRIGGERS") {
            Some(json) => parse_triggers(&json, timezone).context("DAILY_TRIGGERS")?,
            None => Vec::new(),
        };

        let retries: u32 = parse_or(&get, "PROTECTION_RETRIES", 8)?;
        let backoff_ms: u64 = parse_or(&get, "PROTECTION_BACKOFF_MS", 250)?;

        let executor = ExecutorConfig {
            symbol: venue_var("SYMBOL").unwrap_or_default().to_uppercase(),
            quote_asset: get("QUOTE_ASSET").unwrap_or_else(|| default_quote.into()),
            leverage: parse_or(&get, "LEVERAGE", 10)?,
            balance_buffer_ratio: parse_or(&get, "BALANCE_BUFFER", Decimal::new(95, 2))?,
            stop_loss_pct: parse_or(&get, "STOP_LOSS_PCT", Decimal::new(2, 3))?,
            limit_loss_pct: parse_or(&get, "LIMIT_LOSS_PCT", Decimal::new(3, 3))?,
            entry_side: match get("ENTRY_SIDE") {
                Some(raw) => Side::from_str(&raw).map_err(|e| anyhow!("ENTRY_SIDE: {e}"))?,
                None => Side::Buy,
            },
            entry_offset: parse_or(&get, "ENTRY_OFFSET", TimingOffset::from_millis(59_780)?)?,
            protection_offset: parse_or(&get, "PROTECTION_OFFSET", TimingOffset::from_millis(60_250)?)?,
            protection_retry: RetryPolicy::fixed(retries, Duration::from_millis(backoff_ms)),
            handoff_timeout: Duration::from_millis(parse_or(&get, "HANDOFF_TIMEOUT_MS", 30_000)?),
            max_quote_age_ms: get("MAX_QUOTE_AGE_MS")
                .map(|v| v.parse::<u64>().context("MAX_QUOTE_AGE_MS"))
                .transpose()?,
        };

        Ok(Self {
            venue,
            base_url: venue_var("BASE_URL").unwrap_or_else(|| default_base.into()),
            ws_url: get("BINANCE_WS_URL").unwrap_or_else(|| "wss://fstream.binance.com/ws".into()),
            credentials,
            recv_window_ms: parse_or(&get, "RECV_WINDOW_MS", 5_000)?,
            request_timeout: Duration::from_millis(parse_or(&get, "REQUEST_TIMEOUT_MS", 5_000)?),
            price_poll: Duration::from_millis(parse_or(&get, "PRICE_POLL_MS", 250)?),
            timezone,
            triggers,
            force_close_enabled: parse_or(&get, "FORCE_CLOSE_ENABLED", false)?,
            is_production: get("APP_ENV").is_some_and(|v| v == "production"),
            executor,
        })
    }

    /// Cycle parameters, validated. Fails when no symbol is configured.
    pub fn trading(&self) -> anyhow::Result<ExecutorConfig> {
        self.executor.validate().context("invalid trading configuration")?;
        Ok(self.executor.clone())
    }

    pub fn require_credentials(&self) -> anyhow::Result<ApiCredentials> {
        let prefix = self.venue.env_prefix();
        self.credentials.clone().with_context(|| {
            format!("{prefix}_API_KEY / {prefix}_API_SECRET are required for this command")
        })
    }
}

fn parse_or<T, G>(get: &G, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{name}={raw:?}: {e}")),
        None => Ok(default),
    }
}

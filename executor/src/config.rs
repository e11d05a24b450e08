use std::time::Duration;

use market::Side;
use rust_decimal::Decimal;
use scheduler::TimingOffset;
use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("balance buffer ratio must be in (0, 1), got {0}")]
    BufferRatio(Decimal),

    #[error("{name} must be positive, got {value}")]
    NotPositive { name: &'static str, value: Decimal },

    #[error("{name} must be below 1 (100%), got {value}")]
    LossTooLarge { name: &'static str, value: Decimal },

    #[error("limit loss pct {limit} must not be below stop loss pct {stop}")]
    LimitBelowStop { stop: Decimal, limit: Decimal },

    #[error("leverage must be at least 1")]
    Leverage,

    #[error("protection retries must be at least 1")]
    Retries,

    #[error("symbol must not be empty")]
    Symbol,
}

/// Everything one trading cycle needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Used when no override symbol is selected.
    pub symbol: String,
    pub quote_asset: String,
    pub leverage: u32,
    pub balance_buffer_ratio: Decimal,
    pub stop_loss_pct: Decimal,
    pub limit_loss_pct: Decimal,
    pub entry_side: Side,
    pub entry_offset: TimingOffset,
    pub protection_offset: TimingOffset,
    pub protection_retry: RetryPolicy,
    /// How long the protection step waits for the handed-off stop order.
    pub handoff_timeout: Duration,
    pub max_quote_age_ms: Option<u64>,
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Symbol);
        }
        if self.leverage == 0 {
            return Err(ConfigError::Leverage);
        }
        if self.balance_buffer_ratio <= Decimal::ZERO || self.balance_buffer_ratio >= Decimal::ONE {
            return Err(ConfigError::BufferRatio(self.balance_buffer_ratio));
        }
        for (name, value) in [
            ("stop loss pct", self.stop_loss_pct),
            ("limit loss pct", self.limit_loss_pct),
        ] {
            if value <= Decimal::ZERO {
                return Err(ConfigError::NotPositive { name, value });
            }
            // a BUY stop at or below zero can never be accepted
            if value >= Decimal::ONE {
                return Err(ConfigError::LossTooLarge { name, value });
            }
        }
        if self.limit_loss_pct < self.stop_loss_pct {
            return Err(ConfigError::LimitBelowStop {
                stop: self.stop_loss_pct,
                limit: self.limit_loss_pct,
            });
        }
        if self.protection_retry.max_attempts == 0 {
            return Err(ConfigError::Retries);
        }
        Ok(())
    }
}

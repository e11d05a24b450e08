use exchange::ExchangeError;
use market::FeedError;
use thiserror::Error;

/// Why a trading cycle stopped early.
#[derive(Debug, Error)]
pub enum CycleError {
    /// Signature rejected twice in a row.
    #[error("{venue} API Error: {code}")]
    AuthExpired { venue: &'static str, code: String },

    #[error("failed to fetch {what}: {source}")]
    RuleFetchFailed {
        what: &'static str,
        #[source]
        source: ExchangeError,
    },

    #[error("price feed not usable: {0}")]
    FeedNotReady(#[from] FeedError),

    #[error("computed order quantity for {symbol} is zero")]
    ZeroQuantity { symbol: String },

    #[error("entry order rejected: {0}")]
    EntryRejected(#[source] ExchangeError),

    /// The entry filled but no price was known to derive a stop from.
    #[error("no fill price for entry order {entry_order_id} on {symbol}")]
    FillPriceUnknown { symbol: String, entry_order_id: i64 },

    /// The position is open without a protective order.
    #[error("protective order for {symbol} failed after {attempts} attempts: {last_error}")]
    ProtectionFailed {
        symbol: String,
        entry_order_id: i64,
        attempts: u32,
        last_error: String,
    },
}

impl CycleError {
    pub(crate) fn rule_fetch(what: &'static str) -> impl FnOnce(ExchangeError) -> CycleError {
        move |source| match source {
            ExchangeError::AuthExpired { venue, code } => CycleError::AuthExpired { venue, code },
            source => CycleError::RuleFetchFailed { what, source },
        }
    }

    pub(crate) fn entry_rejected(source: ExchangeError) -> CycleError {
        match source {
            ExchangeError::AuthExpired { venue, code } => CycleError::AuthExpired { venue, code },
            source => CycleError::EntryRejected(source),
        }
    }

    /// True when a position may be open and unprotected.
    pub fn is_unprotected_position(&self) -> bool {
        matches!(
            self,
            CycleError::ProtectionFailed { .. } | CycleError::FillPriceUnknown { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::AuthExpired { .. } => "auth_expired",
            CycleError::RuleFetchFailed { .. } => "rule_fetch_failed",
            CycleError::FeedNotReady(_) => "feed_not_ready",
            CycleError::ZeroQuantity { .. } => "zero_quantity",
            CycleError::EntryRejected(_) => "entry_rejected",
            CycleError::FillPriceUnknown { .. } => "fill_price_unknown",
            CycleError::ProtectionFailed { .. } => "protection_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_expiry_keeps_exchange_code() {
        let err = CycleError::rule_fetch("balance")(ExchangeError::AuthExpired {
            venue: "Binance",
            code: "-1021".into(),
        });
        assert_eq!(err.to_string(), "Binance API Error: -1021");
        assert_eq!(err.kind(), "auth_expired");
    }

    #[test]
    fn only_protection_failure_is_unprotected() {
        let fetch = CycleError::rule_fetch("balance")(ExchangeError::MissingAsset("USDT".into()));
        assert!(!fetch.is_unprotected_position());

        let prot = CycleError::ProtectionFailed {
            symbol: "BTCUSDT".into(),
            entry_order_id: 1,
            attempts: 8,
            last_error: "boom".into(),
        };
        assert!(prot.is_unprotected_position());
    }
}

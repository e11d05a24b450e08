use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone)]
struct Selected {
    symbol: String,
    expires_at: Option<Instant>,
}

/// Operator override for the traded symbol.
#[derive(Debug, Default)]
pub struct SymbolSelection {
    selected: Mutex<Option<Selected>>,
}

impl SymbolSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, symbol: &str, ttl: Option<Duration>) {
        let symbol = symbol.trim().to_uppercase();
        info!(%symbol, ttl_secs = ttl.map(|t| t.as_secs()), "trading symbol selected");
        *self.selected.lock() = Some(Selected {
            symbol,
            expires_at: ttl.map(|t| Instant::now() + t),
        });
    }

    pub fn get(&self) -> Option<String> {
        let mut guard = self.selected.lock();
        match guard.as_ref() {
            Some(s) if s.expires_at.is_none_or(|at| at > Instant::now()) => Some(s.symbol.clone()),
            Some(_) => {
                *guard = None;
                None
            }
            None => None,
        }
    }

    pub fn clear(&self) {
        *self.selected.lock() = None;
    }

    /// Override when present, else `configured`.
    pub fn resolve(&self, configured: &str) -> String {
        self.get().unwrap_or_else(|| configured.to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn override_wins_until_it_expires() {
        let sel = SymbolSelection::new();
        assert_eq!(sel.resolve("btcusdt"), "BTCUSDT");

        sel.set("ethusdt", Some(Duration::from_secs(60)));
        assert_eq!(sel.resolve("BTCUSDT"), "ETHUSDT");

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(sel.get(), None);
        assert_eq!(sel.resolve("BTCUSDT"), "BTCUSDT");
    }

    #[test]
    fn clear_drops_override() {
        let sel = SymbolSelection::new();
        sel.set("SOLUSDT", None);
        assert_eq!(sel.get().as_deref(), Some("SOLUSDT"));
        sel.clear();
        assert_eq!(sel.get(), None);
    }
}

//! Account event stream: listen-key lifecycle plus `ACCOUNT_UPDATE` parsing.

use std::sync::Arc;
use std::time::Duration;

use common::ReconnectBackoff;
use futures::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::api::ListenKeyApi;
use crate::error::ExchangeError;

/// Keys expire after 60 minutes; refresh at half that.
pub const LISTEN_KEY_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

pub const FUNDING_FEE_REASON: &str = "FUNDING_FEE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    pub asset: String,
    pub wallet_balance: Decimal,
    pub balance_change: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountUpdate {
    pub event_time_ms: u64,
    /// Why the account changed, e.g. `FUNDING_FEE` or `ORDER`.
    pub reason: String,
    pub balances: Vec<BalanceChange>,
}

impl AccountUpdate {
    pub fn is_funding_fee(&self) -> bool {
        self.reason == FUNDING_FEE_REASON
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserStreamMessage {
    Account(AccountUpdate),
    ListenKeyExpired,
    Other(String),
}

#[derive(Deserialize)]
struct RawEvent {
    e: String,
    #[serde(rename = "E", default)]
    event_time: u64,
    #[serde(default)]
    a: Option<RawAccount>,
}

#[derive(Deserialize)]
struct RawAccount {
    #[serde(default)]
    m: String,
    #[serde(rename = "B", default)]
    balances: Vec<RawBalance>,
}

#[derive(Deserialize)]
struct RawBalance {
    a: String,
    wb: Decimal,
    #[serde(default)]
    bc: Decimal,
}

pub fn parse_user_message(raw: &str) -> Result<UserStreamMessage, ExchangeError> {
    let event: RawEvent =
        serde_json::from_str(raw).map_err(|e| ExchangeError::Decode(e.to_string()))?;

    match event.e.as_str() {
        "ACCOUNT_UPDATE" => {
            let account = event
                .a
                .ok_or_else(|| ExchangeError::Decode("ACCOUNT_UPDATE without account payload".into()))?;

            Ok(UserStreamMessage::Account(AccountUpdate {
                event_time_ms: event.event_time,
                reason: account.m,
                balances: account
                    .balances
                    .into_iter()
                    .map(|b| BalanceChange {
                        asset: b.a,
                        wallet_balance: b.wb,
                        balance_change: b.bc,
                    })
                    .collect(),
            }))
        }
        "listenKeyExpired" => Ok(UserStreamMessage::ListenKeyExpired),
        other => Ok(UserStreamMessage::Other(other.to_string())),
    }
}

enum SessionEnd {
    Shutdown,
    Reconnect,
}

/// Keeps an account stream alive until `shutdown` flips to `true`.
///
/// Every `ACCOUNT_UPDATE` is forwarded to `updates`. The stream ends early
/// when the receiver is dropped.
pub async fn run_user_stream<A: ListenKeyApi>(
    api: Arc<A>,
    ws_base: String,
    updates: mpsc::Sender<AccountUpdate>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ExchangeError> {
    let mut backoff = ReconnectBackoff::user_stream();

    loop {
        if *shutdown.borrow() || updates.is_closed() {
            info!("user stream exiting");
            return Ok(());
        }

        let listen_key = match api.create_listen_key().await {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "failed to create listen key");
                if wait_or_shutdown(backoff.next_delay(), &mut shutdown).await {
                    return Ok(());
                }
                continue;
            }
        };

        let url = format!("{}/{}", ws_base.trim_end_matches('/'), listen_key);
        match run_session(&url, api.as_ref(), &updates, &mut shutdown, &mut backoff).await {
            SessionEnd::Shutdown => return Ok(()),
            SessionEnd::Reconnect => {
                let delay = backoff.next_delay();
                warn!(delay_ms = delay.as_millis() as u64, "user stream disconnected; reconnecting");
                if wait_or_shutdown(delay, &mut shutdown).await {
                    return Ok(());
                }
            }
        }
    }
}

async fn run_session<A: ListenKeyApi>(
    url: &str,
    api: &A,
    updates: &mpsc::Sender<AccountUpdate>,
    shutdown: &mut watch::Receiver<bool>,
    backoff: &mut ReconnectBackoff,
) -> SessionEnd {
    let ws = match connect_async(url).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            error!(error = ?e, "user stream connection failed");
            return SessionEnd::Reconnect;
        }
    };

    info!("user stream connected");
    backoff.connected();

    let (_write, mut read) = ws.split();
    let mut keepalive = tokio::time::interval(LISTEN_KEY_REFRESH_INTERVAL);
    keepalive.tick().await;

    loop {
        tokio::select! {
            msg = read.next() => {
                let Some(msg) = msg else {
                    warn!("user stream ended");
                    return SessionEnd::Reconnect;
                };
                let msg = match msg {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = ?e, "user stream error");
                        return SessionEnd::Reconnect;
                    }
                };
                if msg.is_close() {
                    return SessionEnd::Reconnect;
                }
                let Ok(raw) = msg.to_text() else { continue };
                if raw.is_empty() {
                    continue;
                }

                match parse_user_message(raw) {
                    Ok(UserStreamMessage::Account(update)) => {
                        debug!(reason = %update.reason, "account update");
                        if updates.send(update).await.is_err() {
                            return SessionEnd::Shutdown;
                        }
                    }
                    Ok(UserStreamMessage::ListenKeyExpired) => {
                        warn!("listen key expired");
                        return SessionEnd::Reconnect;
                    }
                    Ok(UserStreamMessage::Other(kind)) => debug!(%kind, "user event ignored"),
                    Err(e) => warn!(error = %e, "failed to parse user event"),
                }
            }
            _ = keepalive.tick() => {
                if let Err(e) = api.keepalive_listen_key().await {
                    warn!(error = %e, "listen key keepalive failed");
                    return SessionEnd::Reconnect;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}

/// Returns `true` when shutdown was requested during the wait.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

use thiserror::Error;

/// Binance: timestamp outside of recvWindow.
pub const BINANCE_EXPIRED_CODE: &str = "-1021";
/// Delta Exchange reports expiry by name.
pub const DELTA_EXPIRED_CODE: &str = "expired_signature";

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange rejected request (status {status}, code {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// Signature expired twice in a row.
    #[error("{venue} API Error: {code}")]
    AuthExpired { venue: &'static str, code: String },

    #[error("failed to decode exchange response: {0}")]
    Decode(String),

    #[error("asset {0} not present in balances")]
    MissingAsset(String),

    #[error("symbol {0} not present in exchange info")]
    MissingSymbol(String),

    #[error("symbol {symbol} has no {filter} filter")]
    MissingFilter { symbol: String, filter: &'static str },

    #[error("invalid credentials: {0}")]
    Credentials(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("order rejected locally: {0}")]
    InvalidOrder(String),
}

impl ExchangeError {
    /// Builds an `Api` error from a non-2xx body.
    ///
    /// Understands `{"code": -1021, "msg": ".."}` and
    /// `{"error": {"code": "expired_signature"}}`.
    pub fn from_api_response(status: u16, body: &str) -> Self {
        let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();

        let (code, message) = match parsed {
            Some(v) => {
                let flat_code = v.get("code").map(code_to_string);
                let nested_code = v
                    .get("error")
                    .and_then(|e| e.get("code"))
                    .map(code_to_string);
                let message = v
                    .get("msg")
                    .or_else(|| v.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string();
                (
                    flat_code.or(nested_code).unwrap_or_else(|| status.to_string()),
                    message,
                )
            }
            None => (status.to_string(), body.to_string()),
        };

        Self::Api {
            status,
            code,
            message,
        }
    }

    pub fn is_expired_signature(&self) -> bool {
        match self {
            Self::Api { code, .. } => code == BINANCE_EXPIRED_CODE || code == DELTA_EXPIRED_CODE,
            Self::AuthExpired { .. } => true,
            _ => false,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } | Self::AuthExpired { code, .. } => Some(code),
            _ => None,
        }
    }
}

fn code_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

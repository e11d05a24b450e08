//! HMAC-SHA256 request signing.
//!
//! Two payload layouts are supported:
//!
//! * [`SigningScheme::QueryString`]: `query&timestamp=..&recvWindow=..` followed
//!   by the body. The signature travels as a `signature` query parameter.
//! * [`SigningScheme::Prehash`]: `method + timestamp + path + ?query + body`
//!   with the timestamp in whole seconds. Timestamp and signature travel as
//!   headers (Delta Exchange).

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::credentials::ApiCredentials;
use crate::error::ExchangeError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigningScheme {
    #[default]
    QueryString,
    Prehash,
}

/// Everything needed to send one authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    /// Milliseconds for `QueryString`, seconds for `Prehash`.
    pub timestamp: u64,
    pub recv_window_ms: u64,
    pub signature: String,
    /// Query string to send, without the signature.
    pub query: String,
    pub headers: Vec<(&'static str, String)>,
}

impl SignedRequest {
    /// Query string ready to append after `?`.
    pub fn url_query(&self, scheme: SigningScheme) -> String {
        match scheme {
            SigningScheme::QueryString => format!("{}&signature={}", self.query, self.signature),
            SigningScheme::Prehash => self.query.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: ApiCredentials,
    scheme: SigningScheme,
    recv_window_ms: u64,
}

impl RequestSigner {
    pub fn new(credentials: ApiCredentials, scheme: SigningScheme, recv_window_ms: u64) -> Self {
        Self {
            credentials,
            scheme,
            recv_window_ms,
        }
    }

    pub fn scheme(&self) -> SigningScheme {
        self.scheme
    }

    pub fn api_key(&self) -> &str {
        self.credentials.api_key()
    }

    /// Hex HMAC-SHA256 of `payload` under the secret key.
    pub fn sign_payload(&self, payload: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.expose_secret().as_bytes())
            .map_err(|e| ExchangeError::Credentials(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Signs one request at `timestamp_ms`. Deterministic for equal inputs.
    pub fn sign(
        &self,
        method: &str,
        path: &str,
        query: &str,
        body: &str,
        timestamp_ms: u64,
    ) -> Result<SignedRequest, ExchangeError> {
        match self.scheme {
            SigningScheme::QueryString => {
                let auth = format!("timestamp={timestamp_ms}&recvWindow={}", self.recv_window_ms);
                let query = if query.is_empty() {
                    auth
                } else {
                    format!("{query}&{auth}")
                };
                let signature = self.sign_payload(&format!("{query}{body}"))?;

                Ok(SignedRequest {
                    timestamp: timestamp_ms,
                    recv_window_ms: self.recv_window_ms,
                    signature,
                    query,
                    headers: vec![("X-MBX-APIKEY", self.api_key().to_string())],
                })
            }
            SigningScheme::Prehash => {
                let query_part = if query.is_empty() {
                    String::new()
                } else {
                    format!("?{query}")
                };
                let timestamp = timestamp_ms / 1000;
                let payload = format!("{method}{timestamp}{path}{query_part}{body}");
                let signature = self.sign_payload(&payload)?;

                Ok(SignedRequest {
                    timestamp,
                    recv_window_ms: self.recv_window_ms,
                    signature: signature.clone(),
                    query: query.to_string(),
                    headers: vec![
                        ("api-key", self.api_key().to_string()),
                        ("timestamp", timestamp.to_string()),
                        ("signature", signature),
                    ],
                })
            }
        }
    }

    /// Signs with the current wall-clock time.
    pub fn sign_now(
        &self,
        method: &str,
        path: &str,
        query: &str,
        body: &str,
    ) -> Result<SignedRequest, ExchangeError> {
        self.sign(method, path, query, body, common::time::now_ms())
    }
}

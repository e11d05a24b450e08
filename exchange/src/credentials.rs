use secrecy::{ExposeSecret, SecretString};

/// API key pair. The secret never shows up in `Debug` output.
#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
    secret_key: SecretString,
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: SecretString::from(secret_key.into()),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Only for computing signatures.
    pub fn expose_secret(&self) -> &str {
        self.secret_key.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.is_empty() || self.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secret() {
        let creds = ApiCredentials::new("my_api_key", "super_secret_key");
        let out = format!("{creds:?}");

        assert!(out.contains("my_api_key"));
        assert!(!out.contains("super_secret_key"));
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn empty_when_either_half_missing() {
        assert!(ApiCredentials::new("", "secret").is_empty());
        assert!(ApiCredentials::new("key", "").is_empty());
        assert!(!ApiCredentials::new("key", "secret").is_empty());
    }
}

// Transport configuration for building the shared reqwest::Client.
//
// Credentials are not baked into default headers: the request pipeline
// applies them per attempt, so the same client can talk to the OAuth2
// token endpoint without leaking API keys to it.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::error::Error;

/// Identifies this library to the API on every request.
pub const CLIENT_IDENTIFIER: &str = concat!("wifiplug-rs/", env!("CARGO_PKG_VERSION"));

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Whole-request timeout. Default: 30s.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: CLIENT_IDENTIFIER.to_owned(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut headers = HeaderMap::new();
        headers.insert("X-API-Client", HeaderValue::from_static(CLIENT_IDENTIFIER));

        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(Error::Transport)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

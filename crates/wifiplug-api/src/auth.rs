// Authentication strategies
//
// Each variant carries only the secret material its flow needs. The pipeline
// applies API keys unconditionally and the configured strategy on top; on a
// 401 it asks the strategy to reauthorize once.

use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::{RequestBody, read_json};
use crate::error::{Error, decode_failure};

/// Default OAuth2 base; the token endpoint is `{base}/token`.
pub const DEFAULT_OAUTH2_URL: &str = "https://account.wifiplug.co.uk/oauth2";

/// Upper bound on a persisted bearer or session token.
const MAX_TOKEN_LEN: usize = 512;

/// Version tag written into serialized credentials.
const STORAGE_VERSION: u8 = 1;

const API_KEY_HEADER: &str = "x-api-key";
const API_SECRET_HEADER: &str = "x-api-secret";
const SESSION_TOKEN_HEADER: &str = "x-session-token";

fn sensitive(name: &'static str, value: &str) -> Result<HeaderValue, Error> {
    let mut header = HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader { name })?;
    header.set_sensitive(true);
    Ok(header)
}

// ── ApiKeys ─────────────────────────────────────────────────────────

/// API key + secret pair sent as `X-API-Key` / `X-API-Secret`.
#[derive(Debug, Clone)]
pub struct ApiKeys {
    key: SecretString,
    secret: SecretString,
}

impl ApiKeys {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: SecretString::from(key.into()),
            secret: SecretString::from(secret.into()),
        }
    }

    pub fn key(&self) -> &SecretString {
        &self.key
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    pub(crate) fn apply(&self, headers: &mut HeaderMap) -> Result<(), Error> {
        headers.insert(
            HeaderName::from_static(API_KEY_HEADER),
            sensitive("X-API-Key", self.key.expose_secret())?,
        );
        headers.insert(
            HeaderName::from_static(API_SECRET_HEADER),
            sensitive("X-API-Secret", self.secret.expose_secret())?,
        );
        Ok(())
    }
}

// ── Authentication ──────────────────────────────────────────────────

/// Credentials applied to every outgoing request.
///
/// Only [`OAuth2`](Self::OAuth2) can reauthorize; every other variant
/// surfaces the original 401.
#[derive(Debug, Clone)]
pub enum Authentication {
    /// Key and secret headers only.
    ApiKey(ApiKeys),
    /// Static bearer token with no refresh capability.
    Bearer { token: SecretString },
    /// Session token from a login, sent as `X-Session-Token`.
    Session { token: SecretString },
    /// Access + refresh token pair issued by the OAuth2 endpoint.
    OAuth2(OAuth2Auth),
}

impl Authentication {
    pub fn api_key(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::ApiKey(ApiKeys::new(key, secret))
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: SecretString::from(token.into()),
        }
    }

    pub fn session(token: impl Into<String>) -> Self {
        Self::Session {
            token: SecretString::from(token.into()),
        }
    }

    /// Add this strategy's headers to an outgoing request. No I/O.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), Error> {
        match self {
            Self::ApiKey(keys) => keys.apply(headers),
            Self::Bearer { token } => {
                let value = format!("Bearer {}", token.expose_secret());
                headers.insert(AUTHORIZATION, sensitive("Authorization", &value)?);
                Ok(())
            }
            Self::Session { token } => {
                headers.insert(
                    HeaderName::from_static(SESSION_TOKEN_HEADER),
                    sensitive("X-Session-Token", token.expose_secret())?,
                );
                Ok(())
            }
            Self::OAuth2(oauth) => {
                let value = format!("Bearer {}", oauth.access_token.expose_secret());
                headers.insert(AUTHORIZATION, sensitive("Authorization", &value)?);
                Ok(())
            }
        }
    }

    /// Whether [`reauthorize`](Self::reauthorize) could ever succeed.
    pub fn can_reauthorize(&self) -> bool {
        matches!(self, Self::OAuth2(oauth) if oauth.refresh_token.is_some())
    }

    /// Try to obtain fresh credentials in place.
    ///
    /// Returns `true` if the original request should be retried.
    pub async fn reauthorize(&mut self, http: &reqwest::Client) -> bool {
        match self {
            Self::OAuth2(oauth) => match oauth.refresh(http).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "OAuth2 token refresh failed");
                    false
                }
            },
            Self::ApiKey(_) | Self::Bearer { .. } | Self::Session { .. } => {
                debug!("authentication strategy cannot reauthorize");
                false
            }
        }
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// Serialize for persistent storage.
    ///
    /// The output is a versioned JSON document; feed it back through
    /// [`deserialize`](Self::deserialize) to restore identical behaviour.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let credentials = match self {
            Self::ApiKey(keys) => StoredAuth::ApiKey {
                key: keys.key.expose_secret().to_owned(),
                secret: keys.secret.expose_secret().to_owned(),
            },
            Self::Bearer { token } => StoredAuth::Bearer {
                token: token.expose_secret().to_owned(),
            },
            Self::Session { token } => StoredAuth::Session {
                token: token.expose_secret().to_owned(),
            },
            Self::OAuth2(oauth) => StoredAuth::OAuth2 {
                client_id: oauth.client_id.clone(),
                client_secret: oauth.client_secret.expose_secret().to_owned(),
                access_token: oauth.access_token.expose_secret().to_owned(),
                refresh_token: oauth
                    .refresh_token
                    .as_ref()
                    .map(|t| t.expose_secret().to_owned()),
                base_url: oauth.base_url.clone(),
            },
        };

        let stored = StoredCredentials {
            version: STORAGE_VERSION,
            credentials,
        };
        Ok(serde_json::to_vec(&stored)?)
    }

    /// Restore credentials written by [`serialize`](Self::serialize).
    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let stored: StoredCredentials = serde_json::from_slice(data)
            .map_err(|e| Error::CredentialFormat(e.to_string()))?;

        if stored.version != STORAGE_VERSION {
            return Err(Error::CredentialFormat(format!(
                "unsupported version {}",
                stored.version
            )));
        }

        let auth = match stored.credentials {
            StoredAuth::ApiKey { key, secret } => Self::api_key(key, secret),
            StoredAuth::Bearer { token } => Self::bearer(checked_token("bearer", token)?),
            StoredAuth::Session { token } => Self::session(checked_token("session", token)?),
            StoredAuth::OAuth2 {
                client_id,
                client_secret,
                access_token,
                refresh_token,
                base_url,
            } => Self::OAuth2(OAuth2Auth {
                client_id,
                client_secret: client_secret.into(),
                access_token: access_token.into(),
                refresh_token: refresh_token.map(SecretString::from),
                base_url,
            }),
        };
        Ok(auth)
    }
}

fn checked_token(kind: &str, token: String) -> Result<String, Error> {
    if token.len() > MAX_TOKEN_LEN {
        return Err(Error::CredentialFormat(format!(
            "{kind} token exceeds {MAX_TOKEN_LEN} bytes"
        )));
    }
    Ok(token)
}

#[derive(Serialize, Deserialize)]
struct StoredCredentials {
    version: u8,
    credentials: StoredAuth,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StoredAuth {
    ApiKey {
        key: String,
        secret: String,
    },
    Bearer {
        token: String,
    },
    Session {
        token: String,
    },
    #[serde(rename = "oauth2")]
    OAuth2 {
        client_id: String,
        client_secret: String,
        access_token: String,
        refresh_token: Option<String>,
        base_url: String,
    },
}

// ── OAuth2 ──────────────────────────────────────────────────────────

/// OAuth2 client credentials plus the current token pair.
#[derive(Debug, Clone)]
pub struct OAuth2Auth {
    client_id: String,
    client_secret: SecretString,
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    base_url: String,
}

/// JSON body returned by `POST {base}/token`.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuth2TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refreshable_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl OAuth2Auth {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            access_token: SecretString::from(access_token.into()),
            refresh_token: refresh_token
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
            base_url: DEFAULT_OAUTH2_URL.to_owned(),
        }
    }

    /// Point token exchanges at a different OAuth2 base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }

    fn token_url(base_url: &str) -> String {
        format!("{}/token", base_url.trim_end_matches('/'))
    }

    /// Exchange an authorization code for a token pair.
    ///
    /// `base_url` defaults to [`DEFAULT_OAUTH2_URL`].
    pub async fn exchange_authorization_code(
        http: &reqwest::Client,
        client_id: &str,
        client_secret: &SecretString,
        authorization_code: &str,
        base_url: Option<&str>,
    ) -> Result<Self, Error> {
        let base_url = base_url.unwrap_or(DEFAULT_OAUTH2_URL);
        let body = RequestBody::form(&[
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
            ("grant_type", "authorization_code"),
            ("code", authorization_code),
        ]);

        let token = request_token(http, &Self::token_url(base_url), body).await?;
        Ok(Self::new(
            client_id,
            client_secret.expose_secret(),
            token.access_token,
            token.refresh_token,
        )
        .with_base_url(base_url))
    }

    /// Swap the stored refresh token for a new pair.
    async fn refresh(&mut self, http: &reqwest::Client) -> Result<(), Error> {
        let Some(refresh_token) = self.refresh_token.as_ref() else {
            return Err(Error::Authentication {
                message: "no refresh token available".into(),
            });
        };

        let body = RequestBody::form(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
        ]);

        let token = request_token(http, &Self::token_url(&self.base_url), body).await?;
        self.access_token = SecretString::from(token.access_token);
        if let Some(refresh) = token.refresh_token.filter(|t| !t.is_empty()) {
            self.refresh_token = Some(SecretString::from(refresh));
        }
        debug!("OAuth2 token refreshed");
        Ok(())
    }
}

async fn request_token(
    http: &reqwest::Client,
    url: &str,
    body: RequestBody,
) -> Result<OAuth2TokenResponse, Error> {
    debug!("POST {url}");
    let resp = http
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, body.content_type())
        .body(body.into_bytes())
        .send()
        .await?;

    let status = resp.status();
    if status.is_success() {
        read_json(resp).await
    } else {
        let raw = resp.text().await?;
        Err(decode_failure(status, raw))
    }
}

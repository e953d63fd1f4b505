// Async HTTP client for the WIFIPLUG REST API.
//
// Base path: https://api.wifiplug.co.uk/v1.0/
// Auth: X-API-Key + X-API-Secret on every request, plus the configured
// authentication strategy (bearer, session token, OAuth2).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{ApiKeys, Authentication};
use crate::error::{Error, decode_failure};
use crate::transport::TransportConfig;

/// Production REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.wifiplug.co.uk/v1.0/";

const REAUTHORIZED_CHANNEL_CAPACITY: usize = 16;

// ── RetryPolicy ──────────────────────────────────────────────────────

/// Bounded retry for 502 Bad Gateway responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per logical call, including the first. Default: 3.
    pub count: u32,
    /// Fixed wait between attempts. Default: 3s.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            count: 3,
            delay: Duration::from_secs(3),
        }
    }
}

// ── RequestBody ──────────────────────────────────────────────────────

/// Pre-encoded request payload, re-sent unchanged on every attempt.
#[derive(Debug, Clone)]
pub struct RequestBody {
    content_type: &'static str,
    bytes: Vec<u8>,
}

impl RequestBody {
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        Ok(Self {
            content_type: "application/json; charset=utf-8",
            bytes: serde_json::to_vec(value)?,
        })
    }

    /// `application/x-www-form-urlencoded` body from key/value pairs.
    pub fn form(pairs: &[(&str, &str)]) -> Self {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        Self {
            content_type: "application/x-www-form-urlencoded",
            bytes: encoded.into_bytes(),
        }
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

// ── Attempt outcome ──────────────────────────────────────────────────

/// Result of a single send. Only the pipeline loop turns the failure
/// variants into `Err`.
enum Outcome {
    Success(reqwest::Response),
    /// 502 Bad Gateway; worth another attempt.
    Retryable(Error),
    /// 401 Unauthorized; worth one reauthorization.
    Unauthorized(Error),
    /// Any other failure status.
    Fatal(Error),
}

// ── Authentication state ─────────────────────────────────────────────

struct AuthState {
    current: RwLock<Authentication>,
    /// Serializes refreshes across concurrent callers.
    refresh_lock: Mutex<()>,
    /// Bumped after every successful refresh.
    generation: AtomicU64,
}

// ── Builder ──────────────────────────────────────────────────────────

/// Builder for [`ApiClient`].
#[derive(Debug, Default)]
pub struct ApiClientBuilder {
    base_url: Option<String>,
    api_keys: Option<ApiKeys>,
    authentication: Option<Authentication>,
    retry: RetryPolicy,
    transport: TransportConfig,
    http: Option<reqwest::Client>,
}

impl ApiClientBuilder {
    /// Override the REST base URL (defaults to [`DEFAULT_API_URL`]).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn api_keys(mut self, keys: ApiKeys) -> Self {
        self.api_keys = Some(keys);
        self
    }

    pub fn authentication(mut self, authentication: Authentication) -> Self {
        self.authentication = Some(authentication);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry.count = count;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry.delay = delay;
        self
    }

    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Use a pre-built `reqwest::Client` instead of one from the transport config.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<ApiClient, Error> {
        let http = match self.http {
            Some(http) => http,
            None => self.transport.build_client()?,
        };
        let base_url = normalize_base_url(self.base_url.as_deref().unwrap_or(DEFAULT_API_URL))?;
        let (reauthorized_tx, _) = broadcast::channel(REAUTHORIZED_CHANNEL_CAPACITY);

        Ok(ApiClient {
            http,
            base_url,
            api_keys: self.api_keys,
            auth: self.authentication.map(|auth| AuthState {
                current: RwLock::new(auth),
                refresh_lock: Mutex::new(()),
                generation: AtomicU64::new(0),
            }),
            retry: RetryPolicy {
                count: self.retry.count.max(1),
                delay: self.retry.delay,
            },
            reauthorized_tx,
        })
    }
}

/// Ensure a trailing slash so relative paths join under the version segment.
fn normalize_base_url(raw: &str) -> Result<Url, Error> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the WIFIPLUG REST API.
///
/// Every call goes through one pipeline: credentials are applied, 502s are
/// retried up to [`RetryPolicy::count`] attempts, and a 401 triggers at most
/// one reauthorization per call. Safe to share between tasks.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    api_keys: Option<ApiKeys>,
    auth: Option<AuthState>,
    retry: RetryPolicy,
    reauthorized_tx: broadcast::Sender<Authentication>,
}

impl ApiClient {
    // ── Constructors ─────────────────────────────────────────────────

    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// Client for the production API with key/secret credentials.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Result<Self, Error> {
        Self::builder()
            .api_keys(ApiKeys::new(api_key, api_secret))
            .build()
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The underlying HTTP client (for auth flows that need direct access).
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Snapshot of the current authentication, e.g. to persist it.
    pub async fn authentication(&self) -> Option<Authentication> {
        match &self.auth {
            Some(state) => Some(state.current.read().await.clone()),
            None => None,
        }
    }

    /// Receive the refreshed credentials after every successful reauthorization.
    pub fn subscribe_reauthorized(&self) -> broadcast::Receiver<Authentication> {
        self.reauthorized_tx.subscribe()
    }

    // ── URL builder ──────────────────────────────────────────────────

    /// Join a relative path (e.g. `"device/abc"`) onto the base URL.
    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    // ── Pipeline ─────────────────────────────────────────────────────

    /// Send one logical request with retry and reauthorization.
    ///
    /// The body is attached for every method except GET. Transport errors
    /// are returned as-is without retrying.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, Error> {
        let mut attempt: u32 = 1;
        let mut reauthorized = false;

        loop {
            let generation = self.auth_generation();

            match self.send_once(&method, path, body.as_ref(), cancel).await? {
                Outcome::Success(resp) => return Ok(resp),
                Outcome::Retryable(err) if attempt < self.retry.count => {
                    warn!(
                        %method,
                        path,
                        attempt,
                        delay_ms = u64::try_from(self.retry.delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Bad gateway, retrying"
                    );
                    self.wait_retry(cancel).await?;
                    attempt += 1;
                }
                Outcome::Unauthorized(err) if !reauthorized && self.auth.is_some() => {
                    reauthorized = true;
                    if !self.reauthorize(generation).await {
                        return Err(err);
                    }
                    debug!(%method, path, "retrying with refreshed credentials");
                }
                Outcome::Retryable(err) | Outcome::Unauthorized(err) | Outcome::Fatal(err) => {
                    return Err(err);
                }
            }
        }
    }

    /// One raw attempt: apply credentials, send, classify the response.
    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&RequestBody>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let url = self.url(path)?;
        let mut headers = HeaderMap::new();
        if let Some(keys) = &self.api_keys {
            keys.apply(&mut headers)?;
        }
        if let Some(state) = &self.auth {
            state.current.read().await.apply(&mut headers)?;
        }

        let mut req = self.http.request(method.clone(), url).headers(headers);
        if let Some(body) = body.filter(|_| *method != Method::GET) {
            req = req
                .header(CONTENT_TYPE, body.content_type())
                .body(body.bytes().to_vec());
        }

        debug!("{method} {path}");

        let resp = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            resp = req.send() => resp?,
        };

        let status = resp.status();
        if status.is_success() {
            return Ok(Outcome::Success(resp));
        }

        let raw = resp.text().await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let err = decode_failure(status, raw);
        Ok(match status {
            StatusCode::BAD_GATEWAY => Outcome::Retryable(err),
            StatusCode::UNAUTHORIZED => Outcome::Unauthorized(err),
            _ => Outcome::Fatal(err),
        })
    }

    async fn wait_retry(&self, cancel: &CancellationToken) -> Result<(), Error> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            () = tokio::time::sleep(self.retry.delay) => Ok(()),
        }
    }

    fn auth_generation(&self) -> u64 {
        self.auth
            .as_ref()
            .map_or(0, |state| state.generation.load(Ordering::Acquire))
    }

    /// Refresh credentials unless another caller already did so after
    /// `seen_generation` was read.
    async fn reauthorize(&self, seen_generation: u64) -> bool {
        let Some(state) = &self.auth else {
            return false;
        };

        let _guard = state.refresh_lock.lock().await;
        if state.generation.load(Ordering::Acquire) != seen_generation {
            debug!("credentials already refreshed by a concurrent request");
            return true;
        }

        let mut refreshed = state.current.read().await.clone();
        if !refreshed.reauthorize(&self.http).await {
            return false;
        }

        *state.current.write().await = refreshed.clone();
        state.generation.fetch_add(1, Ordering::AcqRel);
        info!("reauthorized with refreshed credentials");

        // No receivers is fine.
        let _ = self.reauthorized_tx.send(refreshed);
        true
    }

    // ── Typed helpers ────────────────────────────────────────────────

    /// Request with no body, deserializing a JSON response.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T, Error> {
        let resp = self.request(method, path, None, cancel).await?;
        read_json(resp).await
    }

    /// Serialize `body` as JSON and deserialize a JSON response.
    pub async fn request_json_with<B, T>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = RequestBody::json(body)?;
        let resp = self.request(method, path, Some(body), cancel).await?;
        read_json(resp).await
    }

    /// Request whose response body is ignored.
    pub async fn request_unit(
        &self,
        method: Method,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.request(method, path, None, cancel).await?;
        Ok(())
    }

    pub async fn request_string(
        &self,
        method: Method,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let resp = self.request(method, path, None, cancel).await?;
        Ok(resp.text().await?)
    }

    /// Check the API is reachable.
    pub async fn ping(&self, cancel: &CancellationToken) -> Result<String, Error> {
        self.request_string(Method::GET, "ping", cancel).await
    }
}

// ── Response handling ────────────────────────────────────────────────

/// Verify a JSON content type and deserialize the body.
pub(crate) async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    let is_json = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.trim_start()
                .to_ascii_lowercase()
                .starts_with("application/json")
        });

    let body = resp.text().await?;
    if !is_json {
        return Err(Error::InvalidServerResponse { status, body });
    }

    serde_json::from_str(&body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        Error::Deserialization {
            message: format!("{e} (body preview: {preview:?})"),
            body,
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let url = normalize_base_url("https://api.example.test/v1.0").unwrap();
        assert_eq!(url.as_str(), "https://api.example.test/v1.0/");
        assert_eq!(
            url.join("device/abc").unwrap().as_str(),
            "https://api.example.test/v1.0/device/abc"
        );
    }

    #[test]
    fn form_body_is_url_encoded() {
        let body = RequestBody::form(&[("grant_type", "refresh_token"), ("code", "a b&c")]);
        assert_eq!(body.content_type(), "application/x-www-form-urlencoded");
        assert_eq!(body.bytes(), b"grant_type=refresh_token&code=a+b%26c");
    }

    #[test]
    fn retry_count_is_at_least_one() {
        let client = ApiClient::builder().retry_count(0).build().unwrap();
        assert_eq!(client.retry_policy().count, 1);
    }

    #[test]
    fn default_retry_policy() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.count, 3);
        assert_eq!(retry.delay, Duration::from_secs(3));
    }
}

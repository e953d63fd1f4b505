use std::fmt;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the `wifiplug-api` crate.
///
/// Covers every failure mode across the REST pipeline and the event stream:
/// transport, API failures, malformed responses, authentication, WebSocket
/// and cancellation.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A credential could not be encoded as an HTTP header value.
    #[error("Invalid header value for {name}")]
    InvalidHeader { name: &'static str },

    // ── API ─────────────────────────────────────────────────────────
    /// Structured failure returned by the API.
    #[error(transparent)]
    Api(#[from] ApiException),

    /// The server answered with something that isn't a valid API response:
    /// an undecodable error body, or a non-JSON body where JSON was expected.
    #[error("Invalid server response - {status}")]
    InvalidServerResponse { status: StatusCode, body: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// JSON serialization of a request payload failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Arguments ───────────────────────────────────────────────────
    /// Page size outside the accepted `1..=50` range.
    #[error("The limit must be between 1 and 50, got {limit}")]
    LimitOutOfRange { limit: u32 },

    /// Event selector text did not match `type:resource.name`.
    #[error(transparent)]
    InvalidSelector(#[from] crate::events::SelectorParseError),

    // ── Authentication ──────────────────────────────────────────────
    /// Token exchange with the OAuth2 endpoint failed.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Persisted credential data could not be restored.
    #[error("Invalid credential data: {0}")]
    CredentialFormat(String),

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// Sending a frame over the WebSocket failed.
    #[error("WebSocket send failed: {0}")]
    WebSocketSend(String),

    // ── Control flow ────────────────────────────────────────────────
    /// The caller's cancellation token fired.
    #[error("Operation was cancelled")]
    Cancelled,
}

impl Error {
    /// HTTP status of the response that produced this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api(e) => Some(e.status),
            Self::InvalidServerResponse { status, .. } => Some(*status),
            Self::Transport(e) => e.status(),
            _ => None,
        }
    }

    /// Decoded API errors; empty for anything but [`Error::Api`].
    pub fn errors(&self) -> &[ApiError] {
        match self {
            Self::Api(e) => &e.errors,
            _ => &[],
        }
    }

    /// Returns `true` if the server rejected the credentials.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
            || self.api_error_code() == Some(error_codes::NOT_FOUND)
    }

    /// Returns `true` if this is a transient error worth retrying later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_) => true,
            _ => {
                self.status() == Some(StatusCode::BAD_GATEWAY)
                    || self.api_error_code() == Some(error_codes::SERVICE_UNAVAILABLE)
            }
        }
    }

    /// Code of the first decoded API error, if available.
    pub fn api_error_code(&self) -> Option<&str> {
        self.errors().first().map(|e| e.code.as_str())
    }
}

// ── ApiError ────────────────────────────────────────────────────────

/// One entry of the `errors` array in a failure body.
///
/// Everything besides `error` and `message` lands in `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(rename = "error", default)]
    pub code: String,

    #[serde(default)]
    pub message: String,

    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// ── ApiException ────────────────────────────────────────────────────

/// A non-2xx response the pipeline gave up on.
#[derive(Debug, Clone, Error)]
#[error("API error (HTTP {status}): {message}")]
pub struct ApiException {
    pub message: String,
    pub errors: Vec<ApiError>,
    pub status: StatusCode,
    /// Raw response body as received.
    pub body: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    errors: Vec<ApiError>,
}

/// Decode a failure body of the shape `{"errors":[{"error":..,"message":..}]}`.
///
/// Anything else (invalid JSON, no `errors`, an empty array) becomes
/// [`Error::InvalidServerResponse`] carrying the status.
pub(crate) fn decode_failure(status: StatusCode, body: String) -> Error {
    let errors = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors,
        _ => return Error::InvalidServerResponse { status, body },
    };

    let message = match errors.as_slice() {
        [single] if single.message.is_empty() => "Unspecified error".to_owned(),
        [single] => single.message.clone(),
        many => format!("{} errors occurred", many.len()),
    };

    Error::Api(ApiException {
        message,
        errors,
        status,
        body,
    })
}

// ── Error codes ─────────────────────────────────────────────────────

/// Well-known values of [`ApiError::code`].
pub mod error_codes {
    /// The login credentials are invalid.
    pub const INVALID_LOGIN: &str = "invalid_login";
    /// An underlying service is unavailable; retry later.
    pub const SERVICE_UNAVAILABLE: &str = "service_unavailable";
    pub const INVALID_ACTION: &str = "invalid_action";
    /// No change was submitted.
    pub const EMPTY_REQUEST: &str = "empty_request";
    pub const INVALID_FIELD: &str = "invalid_field";
    pub const ALREADY_EXISTS: &str = "already_exists";
    pub const NOT_FOUND: &str = "not_found";
    /// The target device is not online.
    pub const NOT_ONLINE: &str = "not_online";
    /// The operation requires a user context.
    pub const NO_USER: &str = "no_user";
    pub const ACCESS_EXPIRED: &str = "access_expired";
    pub const INVALID_JSON: &str = "invalid_json";
    pub const MISSING_API_KEY: &str = "missing_api_key";
    pub const MISSING_API_SECRET: &str = "missing_api_secret";
    pub const INVALID_API_KEYS: &str = "invalid_api_keys";
    pub const SUSPENDED_API_KEYS: &str = "suspended_api_keys";
    pub const METHOD_NOT_ALLOWED: &str = "method_not_allowed";
    pub const INTERNAL_SERVER_ERROR: &str = "internal_server_error";
}

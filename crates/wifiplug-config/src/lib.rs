//! Shared configuration for WIFIPLUG API consumers.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation into `wifiplug_api` client settings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use wifiplug_api::client::DEFAULT_API_URL;
use wifiplug_api::events::{DEFAULT_EVENT_URL, EventClientConfig};
use wifiplug_api::transport::TransportConfig;
use wifiplug_api::{ApiClient, ApiClientBuilder, ApiKeys, RetryPolicy};

const KEYRING_SERVICE: &str = "wifiplug";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no {credential} configured for profile '{profile}'")]
    NoCredentials {
        profile: String,
        credential: &'static str,
    },

    #[error("unknown profile '{0}'")]
    UnknownProfile(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_owned()))
    }
}

/// Values used when a profile doesn't override them.
#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Attempts per call on 502 responses.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_retry_count() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    3000
}

/// A named set of endpoints and credentials.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// REST base URL. Defaults to the production API.
    pub api_url: Option<String>,

    /// Event stream URL. Defaults to the production endpoint.
    pub event_url: Option<String>,

    /// API key (plaintext; prefer keyring or env var).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,

    /// API secret (plaintext; prefer keyring or env var).
    pub api_secret: Option<String>,

    /// Environment variable name containing the API secret.
    pub api_secret_env: Option<String>,

    /// Principal the event stream acts for.
    pub scope: Option<String>,

    pub timeout: Option<u64>,

    pub retry_count: Option<u32>,

    pub retry_delay_ms: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("uk.co", "wifiplug", "wifiplug").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("wifiplug");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from `path`, with `WIFIPLUG_` environment overrides.
///
/// Nested keys use a double underscore: `WIFIPLUG_DEFAULTS__TIMEOUT=10`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("WIFIPLUG_").split("__"));

    let config: Config = figment.extract()?;
    tracing::debug!(path = %path.display(), profiles = config.profiles.len(), "loaded config");
    Ok(config)
}

/// Load config, returning a default if it can't be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve one secret: named env var, then system keyring, then plaintext.
fn resolve_secret(
    env_name: Option<&str>,
    keyring_user: &str,
    plaintext: Option<&str>,
    profile_name: &str,
    credential: &'static str,
) -> Result<SecretString, ConfigError> {
    if let Some(val) = env_name.and_then(|name| std::env::var(name).ok()) {
        return Ok(SecretString::from(val));
    }

    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, keyring_user) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    if let Some(val) = plaintext {
        return Ok(SecretString::from(val.to_owned()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
        credential,
    })
}

/// Resolve the API key/secret pair for a profile.
pub fn resolve_api_keys(profile: &Profile, profile_name: &str) -> Result<ApiKeys, ConfigError> {
    let key = resolve_secret(
        profile.api_key_env.as_deref(),
        &format!("{profile_name}/api-key"),
        profile.api_key.as_deref(),
        profile_name,
        "API key",
    )?;
    let secret = resolve_secret(
        profile.api_secret_env.as_deref(),
        &format!("{profile_name}/api-secret"),
        profile.api_secret.as_deref(),
        profile_name,
        "API secret",
    )?;
    Ok(ApiKeys::new(key.expose_secret(), secret.expose_secret()))
}

/// Store a profile's API key and secret in the system keyring.
pub fn store_api_keys(profile_name: &str, keys: &ApiKeys) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/api-key"))?
        .set_password(keys.key().expose_secret())?;
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/api-secret"))?
        .set_password(keys.secret().expose_secret())?;
    Ok(())
}

// ── Client settings ─────────────────────────────────────────────────

/// Everything needed to construct the REST and event clients for a profile.
#[derive(Debug)]
pub struct ClientSettings {
    pub api: ApiClientBuilder,
    pub api_keys: ApiKeys,
    pub events: EventClientConfig,
    pub scope: Option<String>,
}

impl ClientSettings {
    pub fn build_api_client(self) -> Result<ApiClient, wifiplug_api::Error> {
        self.api.build()
    }
}

fn validated_url(field: &str, raw: &str) -> Result<String, ConfigError> {
    url::Url::parse(raw)
        .map(|_| raw.to_owned())
        .map_err(|e| ConfigError::Validation {
            field: field.into(),
            reason: format!("invalid URL '{raw}': {e}"),
        })
}

/// Build client settings from a profile, falling back to `defaults`.
pub fn profile_to_client_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ClientSettings, ConfigError> {
    let api_url = validated_url("api_url", profile.api_url.as_deref().unwrap_or(DEFAULT_API_URL))?;
    let event_url = validated_url(
        "event_url",
        profile.event_url.as_deref().unwrap_or(DEFAULT_EVENT_URL),
    )?;

    let retry_count = profile.retry_count.unwrap_or(defaults.retry_count);
    if retry_count == 0 {
        return Err(ConfigError::Validation {
            field: "retry_count".into(),
            reason: "must be at least 1".into(),
        });
    }

    let api_keys = resolve_api_keys(profile, profile_name)?;
    let retry = RetryPolicy {
        count: retry_count,
        delay: Duration::from_millis(profile.retry_delay_ms.unwrap_or(defaults.retry_delay_ms)),
    };
    let transport = TransportConfig::default()
        .with_timeout(Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)));

    let api = ApiClient::builder()
        .base_url(api_url)
        .api_keys(api_keys.clone())
        .retry_policy(retry)
        .transport(transport);

    Ok(ClientSettings {
        api,
        api_keys,
        events: EventClientConfig {
            url: event_url,
            ..EventClientConfig::default()
        },
        scope: profile.scope.clone(),
    })
}

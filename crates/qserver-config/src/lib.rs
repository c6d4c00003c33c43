//! Configuration for queue-server clients.
//!
//! A flat TOML file in the platform config directory, overlaid with
//! `QSERVER_`-prefixed environment variables, translated into the
//! transport settings of `qserver-api` and the connection settings of
//! `qserver-core`.
//!
//! ```toml
//! url = "http://localhost:60610"
//! use_websockets = true
//! update_interval_ms = 1000
//! api_key_env = "QSERVER_HTTP_SERVER_API_KEY"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use qserver_api::{TlsMode, TransportConfig};
use qserver_core::ConnectionConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "QSERVER_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to render config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config ─────────────────────────────────────────────────────

/// On-disk configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the queue server's HTTP API.
    pub url: String,

    /// Receive status over the WebSocket instead of polling.
    pub use_websockets: bool,

    /// Poll period when `use_websockets` is off.
    pub update_interval_ms: u64,

    /// Per-request HTTP timeout.
    pub timeout_secs: u64,

    /// Ceiling on outgoing HTTP requests.
    pub rate_limit_per_sec: f64,

    /// API key (plaintext; prefer `api_key_env`).
    pub api_key: Option<String>,

    /// Name of an environment variable holding the API key.
    pub api_key_env: Option<String>,

    /// Custom CA certificate for TLS.
    pub ca_cert: Option<PathBuf>,

    /// Accept any TLS certificate.
    pub insecure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: "http://localhost:60610".into(),
            use_websockets: true,
            update_interval_ms: 1000,
            timeout_secs: 10,
            rate_limit_per_sec: qserver_api::client::DEFAULT_RATE_LIMIT,
            api_key: None,
            api_key_env: None,
            ca_cert: None,
            insecure: false,
        }
    }
}

/// Validated settings ready to hand to the transport and the core.
#[derive(Debug, Clone)]
pub struct Settings {
    pub url: Url,
    pub connection: ConnectionConfig,
    pub transport: TransportConfig,
    pub rate_limit_per_sec: f64,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "bluesky", "qserver").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("qserver");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load config from the canonical path plus environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from `path` plus environment. A missing file yields the
/// defaults (still overridable from the environment).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX))
        .extract()?;
    Ok(config)
}

/// Effective config as TOML, with the plaintext API key redacted.
pub fn render_config(cfg: &Config) -> Result<String, ConfigError> {
    let mut shown = cfg.clone();
    if shown.api_key.is_some() {
        shown.api_key = Some("<redacted>".into());
    }
    Ok(toml::to_string_pretty(&shown)?)
}

// ── Resolution ──────────────────────────────────────────────────────

/// Resolve the API key: the variable named by `api_key_env` first, then
/// the plaintext `api_key`.
pub fn resolve_api_key(cfg: &Config) -> Option<SecretString> {
    if let Some(ref env_name) = cfg.api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }
    cfg.api_key.clone().map(SecretString::from)
}

impl Config {
    /// Validate and translate into runtime settings.
    pub fn to_settings(&self) -> Result<Settings, ConfigError> {
        let url: Url = self.url.parse().map_err(|e| ConfigError::Validation {
            field: "url".into(),
            reason: format!("invalid URL '{}': {e}", self.url),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation {
                field: "url".into(),
                reason: format!("expected http or https, got '{}'", url.scheme()),
            });
        }

        if !self.rate_limit_per_sec.is_finite() || self.rate_limit_per_sec <= 0.0 {
            return Err(ConfigError::Validation {
                field: "rate_limit_per_sec".into(),
                reason: format!("must be a positive number, got {}", self.rate_limit_per_sec),
            });
        }

        let connection = ConnectionConfig {
            use_websockets: self.use_websockets,
            update_interval: Duration::from_millis(self.update_interval_ms),
            ..ConnectionConfig::default()
        };
        connection.validate().map_err(|e| ConfigError::Validation {
            field: "update_interval_ms".into(),
            reason: e.to_string(),
        })?;

        let tls = if self.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca_path) = self.ca_cert {
            TlsMode::CustomCa(ca_path.clone())
        } else {
            TlsMode::System
        };

        let transport = TransportConfig {
            tls,
            timeout: Duration::from_secs(self.timeout_secs),
            api_key: resolve_api_key(self),
        };

        Ok(Settings {
            url,
            connection,
            transport,
            rate_limit_per_sec: self.rate_limit_per_sec,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

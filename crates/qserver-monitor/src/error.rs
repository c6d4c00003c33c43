//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and a distinct exit code per failure class.

use miette::Diagnostic;
use thiserror::Error;

use qserver_config::ConfigError;
use qserver_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const REJECTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the queue server at {url}")]
    #[diagnostic(
        code(qserver::connection_failed),
        help(
            "Check that the queue server's HTTP API is running and reachable.\n\
             URL: {url}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Request to the queue server timed out")]
    #[diagnostic(
        code(qserver::timeout),
        help("Increase the timeout with --timeout or check server responsiveness.")
    )]
    Timeout,

    // ── Server ───────────────────────────────────────────────────────
    #[error("Authentication failed (HTTP {status})")]
    #[diagnostic(
        code(qserver::auth_failed),
        help("Pass an API key with --api-key or set api_key_env in the config file.")
    )]
    AuthFailed { status: u16 },

    #[error("Request rejected by the queue server: {message}")]
    #[diagnostic(code(qserver::rejected))]
    Rejected { message: String },

    #[error("API error: {message}")]
    #[diagnostic(code(qserver::api_error))]
    Api { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(qserver::validation))]
    Validation { field: String, reason: String },

    #[error("{0}")]
    #[diagnostic(
        code(qserver::config),
        help("Check the config file (see: qserver-monitor config path) and QSERVER_* variables.")
    )]
    Config(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    #[diagnostic(code(qserver::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout => exit_code::TIMEOUT,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    /// Attach the server URL to a core error.
    pub fn from_core(err: CoreError, url: &url::Url) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => Self::ConnectionFailed {
                url: url.to_string(),
                reason,
            },
            other => other.into(),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => CliError::ConnectionFailed {
                url: "(unknown)".into(),
                reason,
            },
            CoreError::Timeout => CliError::Timeout,
            CoreError::Rejected { message } => CliError::Rejected { message },
            CoreError::Api {
                status: Some(status @ (401 | 403)),
                ..
            } => CliError::AuthFailed { status },
            CoreError::Api { message, .. } | CoreError::Internal(message) => CliError::Api { message },
            CoreError::Config { message } => CliError::Config(message),
            CoreError::NoRuntime(message) => CliError::Api { message },
            CoreError::Shutdown { step, reason } => CliError::Api {
                message: format!("shutdown step '{step}' failed: {reason}"),
            },
        }
    }
}

impl From<qserver_api::Error> for CliError {
    fn from(err: qserver_api::Error) -> Self {
        CoreError::from(err).into()
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other.to_string()),
        }
    }
}

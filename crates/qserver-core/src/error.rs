// ── Core error types ──
//
// Errors surfaced by qserver-core. The orchestration layer never hands
// these to UI callers of `start`/`stop`; they appear in logs, in shutdown
// callbacks, and from constructors. The `From<qserver_api::Error>` impl
// translates transport-layer errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach queue server: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Queue server request timed out")]
    Timeout,

    // ── Server errors ────────────────────────────────────────────────
    #[error("Request rejected by queue server: {message}")]
    Rejected { message: String },

    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Shutdown step '{step}' failed: {reason}")]
    Shutdown { step: String, reason: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<qserver_api::Error> for CoreError {
    fn from(err: qserver_api::Error) -> Self {
        match err {
            qserver_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            qserver_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            qserver_api::Error::InvalidRate(rate) => CoreError::Config {
                message: format!("Invalid rate limit: {rate} permits/second"),
            },
            qserver_api::Error::Http { status, body } => CoreError::Api {
                message: body,
                status: Some(status),
            },
            qserver_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                reason: format!("TLS error: {msg}"),
            },
            qserver_api::Error::Rejected { message } => CoreError::Rejected { message },
            qserver_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                reason: format!("WebSocket connection failed: {reason}"),
            },
            qserver_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            qserver_api::Error::NotConnected => CoreError::ConnectionFailed {
                reason: "WebSocket is not connected".into(),
            },
            qserver_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

// ── Runtime connection configuration ──
//
// Describes *how* the connection manager talks to the queue server.
// Never touches disk: `qserver-config` (or a test) builds a
// `ConnectionConfig` and hands it in.

use std::time::Duration;

use crate::error::CoreError;

/// Period of the health check that re-derives the connection state.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// A connection attempt older than this is treated as failed.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Status older than this marks a live connection as `NoStatus`.
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

/// Fixed delay between WebSocket reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Configuration for the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Receive status over a WebSocket instead of polling over HTTP.
    pub use_websockets: bool,
    /// Poll period in HTTP mode.
    pub update_interval: Duration,
    pub health_interval: Duration,
    pub attempt_timeout: Duration,
    pub status_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            use_websockets: true,
            update_interval: Duration::from_millis(1000),
            health_interval: HEALTH_CHECK_INTERVAL,
            attempt_timeout: ATTEMPT_TIMEOUT,
            status_timeout: STATUS_TIMEOUT,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

impl ConnectionConfig {
    /// HTTP polling at the given period, default timings otherwise.
    pub fn polling(update_interval: Duration) -> Self {
        Self {
            use_websockets: false,
            update_interval,
            ..Self::default()
        }
    }

    /// Reject zero-length periods, which the scheduler cannot honour.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, value) in [
            ("update_interval", self.update_interval),
            ("health_interval", self.health_interval),
            ("attempt_timeout", self.attempt_timeout),
            ("status_timeout", self.status_timeout),
        ] {
            if value.is_zero() {
                return Err(CoreError::Config {
                    message: format!("{name} must be greater than zero"),
                });
            }
        }
        Ok(())
    }
}

// ── HTTP retry policy ──
//
// Retry eligibility and exponential backoff for individual HTTP requests
// made by `HttpRunEngine`. Connection-level reconnects are driven by the
// connection manager with its own fixed delay and do not use this policy.

use std::time::Duration;

use crate::error::Error;

/// Retries after the first attempt, per request.
pub const MAX_RETRIES: u32 = 3;

/// Delay before the first retry.
pub const INITIAL_BACKOFF_MS: u64 = 200;

/// Growth factor between consecutive retries.
pub const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Upper bound on a single backoff delay.
pub const MAX_BACKOFF_MS: u64 = 5_000;

/// HTTP statuses that indicate a transient server-side condition.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Whether a failed request should be retried.
pub fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Transport(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| is_retryable_status(s.as_u16()))
        }
        Error::Http { status, .. } => is_retryable_status(*status),
        _ => false,
    }
}

/// Delay before retry number `attempt` (zero-based).
///
/// `min(INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER^attempt, MAX_BACKOFF_MS)`
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let millis = INITIAL_BACKOFF_MS as f64 * BACKOFF_MULTIPLIER.powi(exponent);
    let capped = millis.min(MAX_BACKOFF_MS as f64);
    Duration::from_millis(capped as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status), "{status} should be retryable");
        }
        for status in [200, 400, 401, 403, 404, 422] {
            assert!(!is_retryable_status(status), "{status} should not be retryable");
        }
    }

    #[test]
    fn http_errors_follow_status_policy() {
        let busy = Error::Http { status: 503, body: String::new() };
        let missing = Error::Http { status: 404, body: String::new() };
        assert!(is_retryable(&busy));
        assert!(!is_retryable(&missing));
        assert!(!is_retryable(&Error::Rejected { message: "no".into() }));
    }

    #[test]
    fn backoff_grows_then_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(200));
        assert_eq!(backoff_delay(1), Duration::from_millis(400));
        assert_eq!(backoff_delay(2), Duration::from_millis(800));
        assert_eq!(backoff_delay(10), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_millis(MAX_BACKOFF_MS));
    }
}

// HTTP client for the queue server's REST endpoints.
//
// Wraps `reqwest::Client` with base-URL joining, rate limiting, and the
// retry policy from `http_support`. Only the endpoints the connection
// layer needs are exposed: status and allowed plans.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::http_support;
use crate::models::StatusSnapshot;
use crate::rate_limiter::RateLimiter;
use crate::service::{BoxFuture, RunEngineService, StatusSocket};
use crate::transport::TransportConfig;
use crate::websocket::WsStatusSocket;

const STATUS_PATH: &str = "api/status";
const PLANS_ALLOWED_PATH: &str = "api/plans/allowed";
const STATUS_WS_PATH: &str = "api/status/ws";

/// Permits per second used when no limiter is supplied.
pub const DEFAULT_RATE_LIMIT: f64 = 20.0;

/// Queue-server client over HTTP, with a WebSocket factory for pushed status.
pub struct HttpRunEngine {
    http: reqwest::Client,
    base_url: Url,
    limiter: Arc<RateLimiter>,
    authorization: Option<String>,
}

impl HttpRunEngine {
    /// Create a client from a `TransportConfig` and a shared limiter.
    pub fn new(
        base_url: Url,
        transport: &TransportConfig,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url: with_trailing_slash(base_url),
            limiter,
            authorization: transport.authorization(),
        })
    }

    /// Create a client with a pre-built `reqwest::Client` and the default limiter.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let base_url = Url::parse(base_url)?;
        Ok(Self {
            http,
            base_url: with_trailing_slash(base_url),
            limiter: Arc::new(RateLimiter::new(DEFAULT_RATE_LIMIT)?),
            authorization: None,
        })
    }

    /// The server root all endpoint paths are joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of the status WebSocket (`http` -> `ws`, `https` -> `wss`).
    pub fn status_ws_url(&self) -> Result<Url, Error> {
        let mut url = self.base_url.join(STATUS_WS_PATH)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|()| {
            Error::WebSocketConnect(format!("cannot derive WebSocket URL from {}", self.base_url))
        })?;
        Ok(url)
    }

    /// GET a JSON endpoint, retrying transient failures with backoff.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.base_url.join(path)?;
        let mut attempt: u32 = 0;

        loop {
            self.limiter.acquire_async().await;

            match self.get_once(&url).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < http_support::MAX_RETRIES && http_support::is_retryable(&e) => {
                    let delay = http_support::backoff_delay(attempt);
                    debug!(%url, error = %e, attempt, delay_ms = delay.as_millis() as u64, "retrying request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once<T: DeserializeOwned>(&self, url: &Url) -> Result<T, Error> {
        debug!(%url, "GET");
        let resp = self.http.get(url.clone()).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

impl RunEngineService for HttpRunEngine {
    fn status(&self) -> BoxFuture<'_, Result<StatusSnapshot, Error>> {
        Box::pin(self.get_json::<StatusSnapshot>(STATUS_PATH))
    }

    fn plans_allowed_raw(&self) -> BoxFuture<'_, Result<Map<String, Value>, Error>> {
        Box::pin(self.get_json::<Map<String, Value>>(PLANS_ALLOWED_PATH))
    }

    fn create_status_websocket(&self) -> Result<Arc<dyn StatusSocket>, Error> {
        let url = self.status_ws_url()?;
        Ok(Arc::new(WsStatusSocket::new(url, self.authorization.clone())))
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_follows_http_scheme() {
        let plain = HttpRunEngine::from_reqwest("http://localhost:60610", reqwest::Client::new()).unwrap();
        assert_eq!(plain.status_ws_url().unwrap().as_str(), "ws://localhost:60610/api/status/ws");

        let secure = HttpRunEngine::from_reqwest("https://qs.example.org/bluesky", reqwest::Client::new()).unwrap();
        assert_eq!(
            secure.status_ws_url().unwrap().as_str(),
            "wss://qs.example.org/bluesky/api/status/ws"
        );
    }
}

//! Status WebSocket.
//!
//! Connects to the queue server's `/api/status/ws` endpoint and hands every
//! text frame to the registered listeners on a background reader task.
//! Reconnection is *not* handled here: the connection manager observes
//! [`StatusSocket::is_connected`] and decides when to try again.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use qserver_api::{StatusSocket, WsStatusSocket};
//! use url::Url;
//!
//! let socket = WsStatusSocket::new(Url::parse("ws://localhost:60610/api/status/ws")?, None);
//! socket.add_listener(Arc::new(|text: &str| println!("{text}")));
//! socket.connect().await?;
//! // ...
//! socket.disconnect();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::service::{BoxFuture, SocketListener, StatusSocket};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ── WsStatusSocket ───────────────────────────────────────────────────

/// Push channel for status updates backed by `tokio-tungstenite`.
pub struct WsStatusSocket {
    url: Url,
    authorization: Option<String>,
    listeners: Arc<Mutex<Vec<SocketListener>>>,
    connected: Arc<AtomicBool>,
    cancel: Mutex<CancellationToken>,
}

impl WsStatusSocket {
    /// Create an unconnected socket. `authorization` is sent verbatim as
    /// the `Authorization` header of the upgrade request.
    pub fn new(url: Url, authorization: Option<String>) -> Self {
        Self {
            url,
            authorization,
            listeners: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn open(&self) -> Result<(), Error> {
        tracing::info!(url = %self.url, "Connecting to status WebSocket");

        let uri: tungstenite::http::Uri = self
            .url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

        let mut request = ClientRequestBuilder::new(uri);
        if let Some(ref auth) = self.authorization {
            request = request.with_header("Authorization", auth.as_str());
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        tracing::info!("Status WebSocket connected");

        let cancel = CancellationToken::new();
        {
            let mut current = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
            current.cancel();
            *current = cancel.clone();
        }
        self.connected.store(true, Ordering::SeqCst);

        tokio::spawn(read_loop(
            ws_stream,
            Arc::clone(&self.listeners),
            Arc::clone(&self.connected),
            cancel,
        ));
        Ok(())
    }
}

impl StatusSocket for WsStatusSocket {
    fn connect(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(self.open())
    }

    fn disconnect(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn add_listener(&self, listener: SocketListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}

impl Drop for WsStatusSocket {
    fn drop(&mut self) {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}

// ── Reader task ──────────────────────────────────────────────────────

/// Read frames until the stream drops or the socket is cancelled.
async fn read_loop(
    ws_stream: WsStream,
    listeners: Arc<Mutex<Vec<SocketListener>>>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        dispatch(text.as_str(), &listeners);
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("WebSocket ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "Status WebSocket close frame received"
                            );
                        } else {
                            tracing::info!("Status WebSocket close frame received (no payload)");
                        }
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Status WebSocket read error");
                        break;
                    }
                    None => {
                        tracing::info!("Status WebSocket stream ended");
                        break;
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }

    // A newer connection on the same socket installs a fresh token; only
    // the reader that still owns the live token may clear the flag.
    if !cancel.is_cancelled() {
        connected.store(false, Ordering::SeqCst);
    }
    tracing::debug!("Status WebSocket reader exiting");
}

/// Hand a text frame to every listener. Listeners run outside the lock.
fn dispatch(text: &str, listeners: &Mutex<Vec<SocketListener>>) {
    let snapshot: Vec<SocketListener> = listeners
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    for listener in snapshot {
        listener(text);
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn dispatch_reaches_every_listener() {
        let socket = WsStatusSocket::new(Url::parse("ws://localhost:60610/api/status/ws").unwrap(), None);
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            socket.add_listener(Arc::new(move |text: &str| {
                assert_eq!(text, "{}");
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        dispatch("{}", &socket.listeners);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn new_socket_is_disconnected() {
        let socket = WsStatusSocket::new(Url::parse("ws://localhost:60610/api/status/ws").unwrap(), None);
        assert!(!socket.is_connected());
        socket.disconnect();
        assert!(!socket.is_connected());
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let socket = WsStatusSocket::new(Url::parse("ws://127.0.0.1:1/api/status/ws").unwrap(), None);
        let err = socket.connect().await.unwrap_err();
        assert!(matches!(err, Error::WebSocketConnect(_)));
        assert!(!socket.is_connected());
    }
}

// ── Service contracts ──
//
// The orchestration layer in `qserver-core` only ever talks to these
// traits. `HttpRunEngine` and `WsStatusSocket` are the production
// implementations; tests plug in in-memory fakes.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::Error;
use crate::models::StatusSnapshot;

/// Boxed, sendable future returned by the object-safe service traits.
pub type BoxFuture<'a, T> = futures_util::future::BoxFuture<'a, T>;

/// Callback invoked with every text frame received on a status socket.
pub type SocketListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Client for the remote run engine.
pub trait RunEngineService: Send + Sync + 'static {
    /// Fetch the current status.
    fn status(&self) -> BoxFuture<'_, Result<StatusSnapshot, Error>>;

    /// Fetch `{"success": bool, "plans_allowed": {name -> metadata}}`.
    fn plans_allowed_raw(&self) -> BoxFuture<'_, Result<Map<String, Value>, Error>>;

    /// Create a (not yet connected) push channel for status updates.
    fn create_status_websocket(&self) -> Result<Arc<dyn StatusSocket>, Error>;
}

/// Push-based status channel.
pub trait StatusSocket: Send + Sync + 'static {
    /// Open the connection. Resolves once the handshake completes;
    /// frames are delivered to listeners afterwards.
    fn connect(&self) -> BoxFuture<'_, Result<(), Error>>;

    /// Close the connection. Safe to call when already closed.
    fn disconnect(&self);

    /// Whether the underlying stream is currently open.
    fn is_connected(&self) -> bool;

    /// Register a frame listener. Listeners survive reconnects of the
    /// same socket and are invoked on the socket's reader task.
    fn add_listener(&self, listener: SocketListener);
}

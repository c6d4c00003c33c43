// In-memory run engine and status socket for driving the core under
// paused tokio time.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use qserver_api::{BoxFuture, Error, RunEngineService, SocketListener, StatusSnapshot, StatusSocket};
use qserver_core::{AppContext, ConnectionConfig};
use serde_json::{Map, Value, json};

/// How the next created socket answers `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Succeed,
    Fail,
    Hang,
}

// ── FakeSocket ───────────────────────────────────────────────────────

pub struct FakeSocket {
    behavior: ConnectBehavior,
    connected: AtomicBool,
    listeners: Mutex<Vec<SocketListener>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl FakeSocket {
    fn new(behavior: ConnectBehavior) -> Self {
        Self {
            behavior,
            connected: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Deliver a raw text frame to every listener.
    pub fn emit(&self, text: &str) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener(text);
        }
    }

    /// Deliver a status frame with the given manager state.
    pub fn emit_status(&self, manager_state: &str) {
        let frame = json!({
            "time": 1_700_000_000.0,
            "msg": { "status": { "manager_state": manager_state, "items_in_queue": 0 } }
        });
        self.emit(&frame.to_string());
    }

    /// Simulate the server closing the stream.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl StatusSocket for FakeSocket {
    fn connect(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                ConnectBehavior::Succeed => {
                    self.connected.store(true, Ordering::SeqCst);
                    Ok(())
                }
                ConnectBehavior::Fail => Err(Error::WebSocketConnect("connection refused".into())),
                ConnectBehavior::Hang => std::future::pending().await,
            }
        })
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn add_listener(&self, listener: SocketListener) {
        self.listeners.lock().unwrap().push(listener);
    }
}

// ── FakeService ──────────────────────────────────────────────────────

pub struct FakeService {
    behavior: Mutex<ConnectBehavior>,
    sockets: Mutex<Vec<Arc<FakeSocket>>>,
    status_ok: AtomicBool,
    plans_response: Mutex<Value>,
    plans_delay: Mutex<Duration>,
    pub status_calls: AtomicUsize,
    pub plans_calls: AtomicUsize,
}

impl FakeService {
    pub fn new(behavior: ConnectBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            sockets: Mutex::new(Vec::new()),
            status_ok: AtomicBool::new(true),
            plans_response: Mutex::new(json!({
                "success": true,
                "msg": "",
                "plans_allowed": {
                    "count": { "name": "count", "description": "Take n readings" },
                    "scan": { "name": "scan" }
                }
            })),
            plans_delay: Mutex::new(Duration::ZERO),
            status_calls: AtomicUsize::new(0),
            plans_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_status_ok(&self, ok: bool) {
        self.status_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_plans_response(&self, response: Value) {
        *self.plans_response.lock().unwrap() = response;
    }

    pub fn set_plans_delay(&self, delay: Duration) {
        *self.plans_delay.lock().unwrap() = delay;
    }

    pub fn sockets_created(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    pub fn socket(&self, index: usize) -> Arc<FakeSocket> {
        Arc::clone(&self.sockets.lock().unwrap()[index])
    }

    pub fn last_socket(&self) -> Arc<FakeSocket> {
        Arc::clone(self.sockets.lock().unwrap().last().unwrap())
    }
}

impl RunEngineService for FakeService {
    fn status(&self) -> BoxFuture<'_, Result<StatusSnapshot, Error>> {
        Box::pin(async move {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            if self.status_ok.load(Ordering::SeqCst) {
                Ok(StatusSnapshot {
                    manager_state: "idle".into(),
                    extra: Map::new(),
                })
            } else {
                Err(Error::Http {
                    status: 503,
                    body: "unavailable".into(),
                })
            }
        })
    }

    fn plans_allowed_raw(&self) -> BoxFuture<'_, Result<Map<String, Value>, Error>> {
        Box::pin(async move {
            self.plans_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.plans_delay.lock().unwrap();
            tokio::time::sleep(delay).await;
            let response = self.plans_response.lock().unwrap().clone();
            Ok(response.as_object().cloned().unwrap_or_default())
        })
    }

    fn create_status_websocket(&self) -> Result<Arc<dyn StatusSocket>, Error> {
        let socket = Arc::new(FakeSocket::new(*self.behavior.lock().unwrap()));
        self.sockets.lock().unwrap().push(Arc::clone(&socket));
        Ok(socket)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Fresh context on the current (paused) runtime.
pub fn context(service: &Arc<FakeService>, config: ConnectionConfig) -> AppContext {
    AppContext::new(config, Arc::clone(service) as Arc<dyn RunEngineService>).unwrap()
}

/// Let spawned tasks run for `ms` of virtual time, then drain the event loop.
pub async fn advance(ctx: &AppContext, ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    ctx.event_loop().flush().await;
}

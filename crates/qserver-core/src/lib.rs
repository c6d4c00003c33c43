// qserver-core: Connection orchestration, shared status bus, and lifecycle for queue-server clients.

pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod event_loop;
pub mod lifecycle;
pub mod observable;
pub mod plans_cache;
pub mod scheduler;
pub mod status_bus;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::ConnectionConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use context::AppContext;
pub use error::CoreError;
pub use event_loop::EventLoop;
pub use lifecycle::{AppLifecycle, Resettable};
pub use observable::{Listener, ListenerId, Observable, ObservableStream};
pub use plans_cache::PlansCache;
pub use scheduler::{PollCenter, TaskHandle};
pub use status_bus::{LatestStatus, StatusBus};

// Transport types callers need alongside the core.
pub use qserver_api::{PlansMap, RunEngineService, StatusSnapshot, StatusSocket};

// qserver-api: Async transport for the queue server's status and allowed-plans endpoints

pub mod client;
pub mod error;
pub mod http_support;
pub mod models;
pub mod rate_limiter;
pub mod service;
pub mod transport;
pub mod websocket;

pub use client::HttpRunEngine;
pub use error::Error;
pub use models::{PlanMetadata, PlansAllowedResponse, PlansMap, StatusSnapshot, StatusWsMessage};
pub use rate_limiter::RateLimiter;
pub use service::{BoxFuture, RunEngineService, SocketListener, StatusSocket};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::WsStatusSocket;

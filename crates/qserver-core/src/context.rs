// ── Application context ──
//
// Owns one instance of every shared component and wires them together.
// Applications in the same process share a context; tests build a fresh
// one each so no state leaks between them.

use std::sync::Arc;

use qserver_api::RunEngineService;
use tokio::runtime::Handle;

use crate::config::ConnectionConfig;
use crate::connection::ConnectionManager;
use crate::error::CoreError;
use crate::event_loop::EventLoop;
use crate::lifecycle::{AppLifecycle, Resettable};
use crate::plans_cache::PlansCache;
use crate::scheduler::PollCenter;
use crate::status_bus::StatusBus;

/// Shared connection state for every application in the process.
#[derive(Clone)]
pub struct AppContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    event_loop: EventLoop,
    poll_center: PollCenter,
    status_bus: StatusBus,
    plans: PlansCache,
    connection: ConnectionManager,
    lifecycle: AppLifecycle,
}

impl AppContext {
    /// Build a context on the current tokio runtime.
    pub fn new(config: ConnectionConfig, service: Arc<dyn RunEngineService>) -> Result<Self, CoreError> {
        let handle = Handle::try_current().map_err(|e| CoreError::NoRuntime(e.to_string()))?;
        Self::with_handle(config, service, &handle)
    }

    /// Build a context whose background tasks run on `handle`.
    pub fn with_handle(
        config: ConnectionConfig,
        service: Arc<dyn RunEngineService>,
        handle: &Handle,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let event_loop = EventLoop::spawn(handle);
        let poll_center = PollCenter::new(handle.clone());
        let status_bus = StatusBus::new(event_loop.clone());
        let plans = PlansCache::new(Arc::clone(&service), event_loop.clone(), poll_center.clone());
        let connection = ConnectionManager::new(
            config,
            service,
            event_loop.clone(),
            poll_center.clone(),
            status_bus.clone(),
            plans.clone(),
        );

        let lifecycle = AppLifecycle::new(vec![
            Arc::new(connection.clone()) as Arc<dyn Resettable>,
            Arc::new(status_bus.clone()) as Arc<dyn Resettable>,
            Arc::new(plans.clone()) as Arc<dyn Resettable>,
        ]);

        Ok(Self {
            inner: Arc::new(ContextInner {
                event_loop,
                poll_center,
                status_bus,
                plans,
                connection,
                lifecycle,
            }),
        })
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn status_bus(&self) -> &StatusBus {
        &self.inner.status_bus
    }

    pub fn plans(&self) -> &PlansCache {
        &self.inner.plans
    }

    pub fn lifecycle(&self) -> &AppLifecycle {
        &self.inner.lifecycle
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    pub fn poll_center(&self) -> &PollCenter {
        &self.inner.poll_center
    }
}

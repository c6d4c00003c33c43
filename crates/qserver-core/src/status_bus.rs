// ── Status bus ──
//
// Process-wide single slot holding the latest status snapshot, or `None`
// while there is no usable connection. Every write lands on the event
// loop; `push` from any other thread is marshalled there in call order.

use std::sync::Arc;

use qserver_api::StatusSnapshot;
use tracing::debug;

use crate::error::CoreError;
use crate::event_loop::EventLoop;
use crate::lifecycle::Resettable;
use crate::observable::{ListenerId, Observable};

/// Latest status as seen by observers.
pub type LatestStatus = Option<Arc<StatusSnapshot>>;

/// Single-slot broadcast of the latest status snapshot.
#[derive(Clone)]
pub struct StatusBus {
    inner: Arc<StatusBusInner>,
}

struct StatusBusInner {
    event_loop: EventLoop,
    latest: Observable<LatestStatus>,
}

impl StatusBus {
    pub fn new(event_loop: EventLoop) -> Self {
        Self {
            inner: Arc::new(StatusBusInner {
                event_loop,
                latest: Observable::new(None),
            }),
        }
    }

    /// The observable cell, for binding or subscribing.
    pub fn latest(&self) -> &Observable<LatestStatus> {
        &self.inner.latest
    }

    /// Snapshot of the current value.
    pub fn current(&self) -> LatestStatus {
        self.inner.latest.get()
    }

    /// Register a tracked listener; detached by [`reset`](Self::reset).
    pub fn add_listener(&self, listener: impl Fn(&LatestStatus) + Send + Sync + 'static) -> ListenerId {
        self.inner.latest.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.latest.remove_listener(id)
    }

    /// Publish a new status (or `None`). Asynchronous unless called on
    /// the event loop.
    pub fn push(&self, status: LatestStatus) {
        let inner = Arc::clone(&self.inner);
        self.inner.event_loop.run_or_defer(move || {
            inner.latest.set(status);
        });
    }

    /// Detach every tracked listener, then clear the value.
    ///
    /// Detaching happens first and synchronously so no listener owned by a
    /// closing window can observe the cleared value.
    pub fn reset(&self) {
        let detached = self.inner.latest.clear_listeners();
        debug!(detached, "status bus reset");
        self.push(None);
    }
}

impl Resettable for StatusBus {
    fn name(&self) -> &str {
        "status bus"
    }

    fn reset(&self) -> Result<(), CoreError> {
        StatusBus::reset(self);
        Ok(())
    }
}

// ── Single-writer coordinator ──
//
// Every mutation of shared observable state (connection state, latest
// status, allowed plans) runs as a job on one coordinator task. Producers
// on timers, socket readers, or loader tasks marshal their updates here,
// so listeners never race each other and observe a total order of writes.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CURRENT_LOOP: u64;
}

/// Handle to a coordinator task. Cheaply cloneable; the task exits once
/// every handle has been dropped and the queue is drained.
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<EventLoopInner>,
}

struct EventLoopInner {
    id: u64,
    tx: mpsc::UnboundedSender<Job>,
}

impl EventLoop {
    /// Spawn the coordinator task on the given runtime.
    pub fn spawn(handle: &Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed);
        handle.spawn(run(id, rx));

        Self {
            inner: Arc::new(EventLoopInner { id, tx }),
        }
    }

    /// Whether the caller is executing inside a job of this loop.
    pub fn is_current(&self) -> bool {
        CURRENT_LOOP
            .try_with(|id| *id == self.inner.id)
            .unwrap_or(false)
    }

    /// Queue a job. Jobs run in submission order.
    pub fn run_later(&self, job: impl FnOnce() + Send + 'static) {
        if self.inner.tx.send(Box::new(job)).is_err() {
            debug!("event loop closed, dropping job");
        }
    }

    /// Run inline when already on this loop, queue otherwise.
    pub fn run_or_defer(&self, job: impl FnOnce() + Send + 'static) {
        if self.is_current() {
            job();
        } else {
            self.run_later(job);
        }
    }

    /// Resolve once every job queued before this call has run.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.run_later(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }
}

async fn run(id: u64, mut rx: mpsc::UnboundedReceiver<Job>) {
    debug!(id, "event loop started");
    while let Some(job) = rx.recv().await {
        CURRENT_LOOP.sync_scope(id, || {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!(id, "event loop job panicked");
            }
        });
    }
    debug!(id, "event loop stopped");
}

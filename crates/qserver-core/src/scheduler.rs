// ── Background task scheduling ──
//
// Periodic and delayed jobs on the tokio runtime, each with its own
// cancellation handle. Cancellation is checked between runs: a job that
// has already started is allowed to finish.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Cancellable handle to a scheduled job.
#[derive(Debug)]
pub struct TaskHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Stop the job. Future runs are skipped; a run in progress completes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and abort the task at its next await point, dropping any
    /// run in progress.
    pub fn abort(&self) {
        self.cancel.cancel();
        self.join.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Scheduler for the connection layer's background jobs.
#[derive(Clone)]
pub struct PollCenter {
    handle: Handle,
}

impl PollCenter {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Run `job` every `period`, starting immediately. Runs never
    /// overlap: the next tick waits for the previous run to finish.
    pub fn every<F, Fut>(&self, period: Duration, mut job: F) -> TaskHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let join = self.handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = interval.tick() => job().await,
                }
            }
        });

        TaskHandle { cancel, join }
    }

    /// Run `job` once after `delay`.
    pub fn after<F, Fut>(&self, delay: Duration, job: F) -> TaskHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let join = self.handle.spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => job().await,
            }
        });

        TaskHandle { cancel, join }
    }

    /// Run `job` once, as soon as possible.
    pub fn submit<F, Fut>(&self, job: F) -> TaskHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.after(Duration::ZERO, job)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn every_ticks_until_cancelled() {
        let center = PollCenter::new(Handle::current());
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let task = center.every(Duration::from_millis(100), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Ticks at 0, 100, 200, 300 ms.
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);

        task.cancel();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn after_fires_once() {
        let center = PollCenter::new(Handle::current());
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let _task = center.after(Duration::from_secs(5), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_after_never_fires() {
        let center = PollCenter::new(Handle::current());
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let task = center.after(Duration::from_secs(1), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        task.cancel();
        assert!(task.is_cancelled());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}

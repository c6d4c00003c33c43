// ── Observable cells ──
//
// A single-slot value with two ways to observe it: `watch` receivers and
// streams for async consumers, and tracked listeners for callback-style
// consumers. Tracked listeners can be detached one by one through their
// `ListenerId`, or all at once before the owner clears the value.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Change listener. Invoked on the event loop with the new value.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`Observable::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Observable single-slot value.
///
/// Reads are allowed from any thread. Writes go through `set`, which the
/// owning component only calls from its event loop.
pub struct Observable<T> {
    value: watch::Sender<T>,
    listeners: Mutex<Vec<(ListenerId, Listener<T>)>>,
    next_id: AtomicU64,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Observable<T> {
    pub fn new(initial: T) -> Self {
        let (value, _) = watch::channel(initial);
        Self {
            value,
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    /// Subscribe to value changes via a `watch::Receiver`.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.value.subscribe()
    }

    /// Stream yielding the current value, then every change.
    pub fn stream(&self) -> ObservableStream<T> {
        ObservableStream {
            inner: WatchStream::new(self.value.subscribe()),
        }
    }

    /// Register a tracked listener.
    pub fn add_listener(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_listeners().push((id, Arc::new(listener)));
        id
    }

    /// Detach a tracked listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    /// Detach every tracked listener, returning how many were removed.
    pub fn clear_listeners(&self) -> usize {
        let mut listeners = self.lock_listeners();
        let removed = listeners.len();
        listeners.clear();
        removed
    }

    /// Store a new value. Listeners run, in registration order, only when
    /// the value actually changed. Returns whether it changed.
    pub(crate) fn set(&self, value: T) -> bool {
        let changed = self.value.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value.clone();
                true
            }
        });

        if changed {
            let listeners: Vec<Listener<T>> = self
                .lock_listeners()
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            for listener in listeners {
                listener(&value);
            }
        }
        changed
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(ListenerId, Listener<T>)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Stream adapter ───────────────────────────────────────────────────

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct ObservableStream<T: Clone + Send + Sync + 'static> {
    inner: WatchStream<T>,
}

impl<T: Clone + Send + Sync + 'static> Stream for ObservableStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio_stream::StreamExt;

    use super::*;

    #[test]
    fn listeners_fire_only_on_change() {
        let cell = Observable::new(0_u32);
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        cell.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(cell.set(1));
        assert!(!cell.set(1));
        assert!(cell.set(2));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(cell.get(), 2);
    }

    #[test]
    fn removed_listener_is_not_invoked() {
        let cell = Observable::new(String::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let first = cell.add_listener(move |v: &String| sink.lock().unwrap().push(format!("a:{v}")));
        let sink = Arc::clone(&seen);
        cell.add_listener(move |v: &String| sink.lock().unwrap().push(format!("b:{v}")));

        cell.set("x".into());
        assert!(cell.remove_listener(first));
        assert!(!cell.remove_listener(first));
        cell.set("y".into());

        assert_eq!(*seen.lock().unwrap(), vec!["a:x", "b:x", "b:y"]);
        assert_eq!(cell.listener_count(), 1);
        assert_eq!(cell.clear_listeners(), 1);
        assert_eq!(cell.listener_count(), 0);
    }

    #[tokio::test]
    async fn stream_yields_current_then_changes() {
        let cell = Observable::new(1_u8);
        let mut stream = cell.stream();

        assert_eq!(stream.next().await, Some(1));
        cell.set(5);
        assert_eq!(stream.next().await, Some(5));
    }
}

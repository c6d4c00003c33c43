// ── Application lifecycle ──
//
// Several application windows can share one connection. Each registers on
// open and unregisters on close; when the last one goes away the shared
// state is torn down: shutdown callbacks first, then the connection
// manager, status bus, plans cache and any extra singletons, in that
// order. Every step is isolated so one failure cannot block the rest.
//
// Registration and teardown are serialised: an application that registers
// while a shutdown is running waits for it to finish and then starts a
// fresh session.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::error::CoreError;

/// Shared component that can be returned to its initial state.
pub trait Resettable: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    fn reset(&self) -> Result<(), CoreError>;
}

type ShutdownCallback = Box<dyn FnOnce() -> Result<(), CoreError> + Send>;

/// Reference-counted registry of running applications.
pub struct AppLifecycle {
    /// Held across each count transition, including the whole shutdown.
    transition: Mutex<()>,
    active: Mutex<usize>,
    callbacks: Mutex<Vec<ShutdownCallback>>,
    components: Vec<Arc<dyn Resettable>>,
    singletons: Mutex<Vec<Arc<dyn Resettable>>>,
}

impl AppLifecycle {
    /// `components` are reset in the given order on shutdown, before any
    /// singleton registered later.
    pub fn new(components: Vec<Arc<dyn Resettable>>) -> Self {
        Self {
            transition: Mutex::new(()),
            active: Mutex::new(0),
            callbacks: Mutex::new(Vec::new()),
            components,
            singletons: Mutex::new(Vec::new()),
        }
    }

    /// Record a newly opened application. Returns the new count.
    ///
    /// Blocks while a shutdown is in progress.
    pub fn register_app(&self) -> usize {
        let _transition = lock(&self.transition);
        let mut active = lock(&self.active);
        *active += 1;
        debug!(active = *active, "application registered");
        *active
    }

    /// Record a closed application. Returns `true` if this was the last
    /// one and shutdown ran.
    ///
    /// Shutdown steps must not call back into `register_app` or
    /// `unregister_app`.
    pub fn unregister_app(&self) -> bool {
        let _transition = lock(&self.transition);
        {
            let mut active = lock(&self.active);
            if *active == 0 {
                warn!("unregister_app called with no registered applications");
                return false;
            }
            *active -= 1;
            debug!(active = *active, "application unregistered");
            if *active > 0 {
                return false;
            }
        }
        self.shutdown();
        true
    }

    pub fn active_apps(&self) -> usize {
        *lock(&self.active)
    }

    /// Run `callback` during the next shutdown. Callbacks run once and are
    /// then forgotten, so callers that need one in every session register
    /// it again after each `register_app` that starts a session.
    pub fn register_shutdown(&self, callback: impl FnOnce() -> Result<(), CoreError> + Send + 'static) {
        lock(&self.callbacks).push(Box::new(callback));
    }

    /// Reset `singleton` on every shutdown, after the core components.
    pub fn register_singleton(&self, singleton: Arc<dyn Resettable>) {
        debug!(name = singleton.name(), "singleton registered");
        lock(&self.singletons).push(singleton);
    }

    fn shutdown(&self) {
        info!("last application closed, shutting down shared state");

        let callbacks = std::mem::take(&mut *lock(&self.callbacks));
        let mut failures = 0_usize;
        for (index, callback) in callbacks.into_iter().enumerate() {
            if !run_isolated(&format!("shutdown callback #{index}"), callback) {
                failures += 1;
            }
        }

        let singletons = lock(&self.singletons).clone();
        for component in self.components.iter().chain(singletons.iter()) {
            if !run_isolated(component.name(), || component.reset()) {
                failures += 1;
            }
        }

        if failures == 0 {
            info!("shutdown complete");
        } else {
            warn!(failures, "shutdown complete with failures");
        }
    }
}

/// Run one shutdown step, containing both errors and panics. Returns
/// whether the step succeeded.
fn run_isolated(step: &str, f: impl FnOnce() -> Result<(), CoreError>) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {
            debug!(step, "shutdown step done");
            true
        }
        Ok(Err(e)) => {
            let err = CoreError::Shutdown {
                step: step.to_owned(),
                reason: e.to_string(),
            };
            error!(error = %err, "shutdown step failed");
            false
        }
        Err(payload) => {
            let err = CoreError::Shutdown {
                step: step.to_owned(),
                reason: panic_message(payload.as_ref()),
            };
            error!(error = %err, "shutdown step panicked");
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_owned())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
